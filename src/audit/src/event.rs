//! Audit event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log type stamped on events that do not carry one
pub const DEFAULT_LOG_TYPE: &str = "AuthzAudit";

/// Evidence of one authorization decision
///
/// Created by a policy engine (or by the session for decisions it makes
/// itself), owned by the collector until selection, then by the delivery
/// channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier, assigned at emission
    pub event_id: String,

    /// When the decision was made
    pub event_time: DateTime<Utc>,

    /// Acting user
    pub user: String,

    /// Requested access verb (read, write, admin, ...)
    pub access_type: String,

    /// Resource addressed by the request, e.g. `orders/pii`
    pub resource_path: String,

    /// Deepest resource level addressed, e.g. `column-family`
    #[serde(default)]
    pub resource_type: String,

    /// Operation that triggered the check
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Free-form request data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<String>,

    /// Originating network address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,

    /// Decision outcome
    pub allowed: bool,

    /// Reason supplied with the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Policy that made the decision, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,

    /// Host that produced the event
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_hostname: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_type: Option<String>,
}

impl AuditEvent {
    /// Create a new event stamped with a fresh id and the current time
    pub fn new(
        user: impl Into<String>,
        access_type: impl Into<String>,
        resource_path: impl Into<String>,
        allowed: bool,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_time: Utc::now(),
            user: user.into(),
            access_type: access_type.into(),
            resource_path: resource_path.into(),
            resource_type: String::new(),
            action: None,
            request_data: None,
            client_ip: None,
            allowed,
            reason: None,
            policy_id: None,
            agent_hostname: None,
            log_type: None,
        }
    }

    pub fn with_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = resource_type.into();
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_request_data(mut self, data: impl Into<String>) -> Self {
        self.request_data = Some(data.into());
        self
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_policy_id(mut self, policy_id: impl Into<String>) -> Self {
        self.policy_id = Some(policy_id.into());
        self
    }

    /// Fill in delivery metadata the producer left unset.
    ///
    /// Only absent values are touched: hostname and log type are never
    /// overwritten and a non-empty id is kept.
    pub fn fill_delivery_defaults(&mut self, hostname: &str) {
        if self.agent_hostname.is_none() {
            self.agent_hostname = Some(hostname.to_string());
        }
        if self.log_type.is_none() {
            self.log_type = Some(DEFAULT_LOG_TYPE.to_string());
        }
        if self.event_id.is_empty() {
            self.event_id = Uuid::new_v4().to_string();
        }
    }
}
