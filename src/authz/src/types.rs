//! Core authorization types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use warden_audit::AuditEvent;

use crate::error::{AuthzError, Result};

pub const TABLE: &str = "table";
pub const COLUMN_FAMILY: &str = "column-family";
pub const COLUMN: &str = "column";

/// Ordered level names of a hierarchical resource, shallowest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceHierarchy {
    levels: Arc<[String]>,
}

impl ResourceHierarchy {
    /// Create a hierarchy from level names, shallowest first
    pub fn new<I, S>(levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let levels: Vec<String> = levels.into_iter().map(Into::into).collect();
        Self {
            levels: levels.into(),
        }
    }

    /// `table → column-family → column`
    pub fn tabular() -> Self {
        Self::new([TABLE, COLUMN_FAMILY, COLUMN])
    }

    pub fn levels(&self) -> &[String] {
        &self.levels
    }

    pub fn depth_of(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

impl Default for ResourceHierarchy {
    fn default() -> Self {
        Self::tabular()
    }
}

/// Variable-depth address of a protected resource
///
/// A component at depth *n* is only meaningful when every component at
/// depth < n is provided; [`ResourcePath::validate`] enforces this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePath {
    hierarchy: ResourceHierarchy,
    values: Vec<Option<String>>,
}

fn is_provided(value: &Option<String>) -> bool {
    value.as_deref().map_or(false, |v| !v.is_empty())
}

impl ResourcePath {
    pub fn new(hierarchy: ResourceHierarchy) -> Self {
        let values = vec![None; hierarchy.levels().len()];
        Self { hierarchy, values }
    }

    pub fn hierarchy(&self) -> &ResourceHierarchy {
        &self.hierarchy
    }

    /// Set a component. Returns false if the level is not part of the hierarchy.
    pub fn set(&mut self, level: &str, value: Option<String>) -> bool {
        match self.hierarchy.depth_of(level) {
            Some(depth) => {
                self.values[depth] = value;
                true
            }
            None => false,
        }
    }

    /// Provided value of a level; empty strings count as absent
    pub fn get(&self, level: &str) -> Option<&str> {
        let depth = self.hierarchy.depth_of(level)?;
        self.values[depth].as_deref().filter(|v| !v.is_empty())
    }

    /// Check the prefix-presence invariant
    pub fn validate(&self) -> Result<()> {
        let levels = self.hierarchy.levels();
        for depth in 1..self.values.len() {
            if is_provided(&self.values[depth]) && !is_provided(&self.values[depth - 1]) {
                return Err(AuthzError::Configuration(format!(
                    "{} must be provided if {} is provided",
                    levels[depth - 1],
                    levels[depth]
                )));
            }
        }
        Ok(())
    }

    /// Number of leading provided components
    pub fn depth(&self) -> usize {
        self.values.iter().take_while(|v| is_provided(v)).count()
    }

    /// Name of the deepest provided level, if any
    pub fn leaf_level(&self) -> Option<&str> {
        match self.depth() {
            0 => None,
            depth => Some(self.hierarchy.levels()[depth - 1].as_str()),
        }
    }

    /// `level[value]` pairs for every level, empty brackets when unset
    pub fn describe(&self) -> String {
        self.hierarchy
            .levels()
            .iter()
            .zip(&self.values)
            .map(|(level, value)| format!("{}[{}]", level, value.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ResourcePath {
    fn default() -> Self {
        Self::new(ResourceHierarchy::tabular())
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provided: Vec<&str> = self
            .values
            .iter()
            .take_while(|v| is_provided(v))
            .filter_map(|v| v.as_deref())
            .collect();
        write!(f, "{}", provided.join("/"))
    }
}

impl Serialize for ResourcePath {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(None)?;
        for (level, value) in self.hierarchy.levels().iter().zip(&self.values) {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                map.serialize_entry(level, value)?;
            }
        }
        map.end()
    }
}

/// Snapshot of one requested operation, handed to the policy engine
#[derive(Debug, Clone, Serialize)]
pub struct AccessRequest {
    /// Resource being accessed
    pub resource: ResourcePath,

    /// Requested access verb
    pub access: String,

    /// Acting user's display name
    pub user: String,

    /// Groups resolved for the user when the identity was set
    pub groups: BTreeSet<String>,

    /// Operation that triggered the check
    pub action: Option<String>,

    /// Free-form contextual data
    pub request_data: Option<String>,

    /// Originating network address
    pub client_ip: Option<String>,

    pub access_time: DateTime<Utc>,
}

impl AccessRequest {
    /// Audit evidence for this request under the given result
    pub fn audit_event(&self, result: &AccessResult) -> AuditEvent {
        let mut event = AuditEvent::new(
            self.user.clone(),
            self.access.clone(),
            self.resource.to_string(),
            result.allowed,
        )
        .with_resource_type(self.resource.leaf_level().unwrap_or_default());

        if !result.reason.is_empty() {
            event = event.with_reason(result.reason.clone());
        }
        if let Some(policy_id) = &result.policy_id {
            event = event.with_policy_id(policy_id.clone());
        }
        if let Some(action) = &self.action {
            event = event.with_action(action.clone());
        }
        if let Some(data) = &self.request_data {
            event = event.with_request_data(data.clone());
        }
        if let Some(ip) = &self.client_ip {
            event = event.with_client_ip(ip.clone());
        }
        event
    }
}

impl fmt::Display for AccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<&str> = self.groups.iter().map(String::as_str).collect();
        write!(
            f,
            "access[{}] by user[{}] belonging to groups[{}] to {} triggered by operation[{}], request_data[{}]",
            self.access,
            self.user,
            groups.join(","),
            self.resource.describe(),
            self.action.as_deref().unwrap_or(""),
            self.request_data.as_deref().unwrap_or(""),
        )
    }
}

/// Outcome of evaluating one [`AccessRequest`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
    pub allowed: bool,

    /// Whether the engine considers this decision audit-worthy
    pub audited: bool,

    /// Denial reason; empty unless denied
    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

impl AccessResult {
    pub fn new(allowed: bool, audited: bool, reason: impl Into<String>) -> Self {
        Self {
            allowed,
            audited,
            reason: reason.into(),
            policy_id: None,
        }
    }

    /// Audited allow decision
    pub fn allow() -> Self {
        Self::new(true, true, "")
    }

    /// Audited deny decision
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(false, true, reason)
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }
}
