//! Authorization session state machine
//!
//! ```text
//! Configuring ──build_request──▶ Built ──authorize──▶ Evaluated ──publish──▶ Published
//!      ▲                            │                     ▲
//!      └── reset                    └── known_pattern_* ──┘ (no engine call)
//! ```
//!
//! Configured fields outlive a build: a caller can change one resource level
//! and build again without resolving the identity's groups a second time.
//! Setting a field to an empty string clears it; `reset` clears them all.
//!
//! A session is reusable but not shareable: keep it on one task or take one
//! per logical request.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};
use warden_audit::AuditWriter;

use crate::collector::AuditCollector;
use crate::engine::PolicyEngine;
use crate::error::{AuthzError, Result};
use crate::identity::{GroupResolver, Identity};
use crate::types::{
    AccessRequest, AccessResult, ResourceHierarchy, ResourcePath, COLUMN, COLUMN_FAMILY, TABLE,
};

/// Where a session is in its protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fields are being set; no request exists
    Configuring,

    /// A request snapshot exists and has not been evaluated
    Built,

    /// A result exists and has not been published
    Evaluated,

    /// The result was published; build a new request to continue
    Published,
}

/// Fields for the next request. Copied into the snapshot by `build_request`.
#[derive(Debug, Clone)]
struct PendingRequest {
    operation: Option<String>,
    other_information: Option<String>,
    remote_address: Option<String>,
    access: Option<String>,
    identity: Option<Identity>,
    user_name: Option<String>,
    groups: BTreeSet<String>,
    resource: ResourcePath,
    unknown_levels: Vec<String>,
}

fn non_empty(value: String) -> Option<String> {
    Some(value).filter(|v| !v.is_empty())
}

impl PendingRequest {
    fn new(hierarchy: &ResourceHierarchy) -> Self {
        Self {
            operation: None,
            other_information: None,
            remote_address: None,
            access: None,
            identity: None,
            user_name: None,
            groups: BTreeSet::new(),
            resource: ResourcePath::new(hierarchy.clone()),
            unknown_levels: Vec::new(),
        }
    }
}

/// Builds one access request at a time, evaluates it and enforces the result
pub struct AuthorizationSession {
    engine: Arc<dyn PolicyEngine>,
    resolver: Arc<dyn GroupResolver>,
    writer: Arc<dyn AuditWriter>,
    hierarchy: ResourceHierarchy,
    pending: PendingRequest,
    /// `None` suppresses auditing
    collector: Option<AuditCollector>,
    request: Option<Arc<AccessRequest>>,
    result: Option<AccessResult>,
    state: SessionState,
}

impl AuthorizationSession {
    /// Create a session for the `table → column-family → column` hierarchy
    pub fn new(
        engine: Arc<dyn PolicyEngine>,
        resolver: Arc<dyn GroupResolver>,
        writer: Arc<dyn AuditWriter>,
    ) -> Self {
        let hierarchy = ResourceHierarchy::tabular();
        Self {
            engine,
            resolver,
            writer,
            pending: PendingRequest::new(&hierarchy),
            hierarchy,
            collector: None,
            request: None,
            result: None,
            state: SessionState::Configuring,
        }
    }

    /// Use a different resource hierarchy. Discards pending fields.
    pub fn with_hierarchy(mut self, hierarchy: ResourceHierarchy) -> Self {
        self.pending = PendingRequest::new(&hierarchy);
        self.hierarchy = hierarchy;
        self
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    pub fn operation(&mut self, operation: impl Into<String>) -> &mut Self {
        self.pending.operation = non_empty(operation.into());
        self
    }

    pub fn other_information(&mut self, information: impl Into<String>) -> &mut Self {
        self.pending.other_information = non_empty(information.into());
        self
    }

    pub fn remote_address(&mut self, address: impl Into<String>) -> &mut Self {
        self.pending.remote_address = non_empty(address.into());
        self
    }

    pub fn access(&mut self, access: impl Into<String>) -> &mut Self {
        self.pending.access = non_empty(access.into());
        self
    }

    /// Set the acting identity and resolve its groups now
    ///
    /// `None` leaves an empty group set and makes the next `build_request`
    /// fail.
    pub fn identity(&mut self, identity: Option<Identity>) -> &mut Self {
        match &identity {
            Some(id) => {
                self.pending.user_name = Some(self.resolver.display_name(id));
                self.pending.groups = self.resolver.groups(Some(id));
            }
            None => {
                debug!("AuthorizationSession.identity: identity is None");
                self.pending.user_name = None;
                self.pending.groups = self.resolver.groups(None);
            }
        }
        self.pending.identity = identity;
        self
    }

    pub fn table(&mut self, table: impl Into<String>) -> &mut Self {
        self.resource(TABLE, table)
    }

    pub fn column_family(&mut self, column_family: impl Into<String>) -> &mut Self {
        self.resource(COLUMN_FAMILY, column_family)
    }

    pub fn column(&mut self, column: impl Into<String>) -> &mut Self {
        self.resource(COLUMN, column)
    }

    /// Set a resource path component by level name; empty clears it
    pub fn resource(&mut self, level: &str, value: impl Into<String>) -> &mut Self {
        if !self.pending.resource.set(level, non_empty(value.into())) {
            self.pending.unknown_levels.push(level.to_string());
        }
        self
    }

    /// Attach a collector, or detach with `None` to suppress auditing
    pub fn audit_collector(&mut self, collector: Option<AuditCollector>) -> &mut Self {
        self.collector = collector;
        self
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn verify_buildable(&self) -> Result<()> {
        let fail = |detail: String| {
            error!("Incomplete/inconsistent state: [{}]. Can't build access request", detail);
            Err(AuthzError::Configuration(detail))
        };

        if self.pending.access.as_deref().map_or(true, str::is_empty) {
            return fail("access is empty".to_string());
        }
        if self.pending.identity.is_none() {
            return fail("identity is not set".to_string());
        }
        if let Some(level) = self.pending.unknown_levels.first() {
            return fail(format!("unknown resource level '{}'", level));
        }
        if let Err(e) = self.pending.resource.validate() {
            error!("{}", e);
            return Err(e);
        }
        Ok(())
    }

    /// Validate the configured fields and snapshot them into a fresh request
    ///
    /// Any previous request, result and captured events are discarded. The
    /// configured fields stay in place for the next build. On error nothing
    /// changes.
    pub fn build_request(&mut self) -> Result<&mut Self> {
        self.verify_buildable()?;

        if let Some(collector) = &self.collector {
            collector.clear();
        }

        let pending = &self.pending;
        let user = pending.user_name.clone().unwrap_or_default();

        debug!(
            "AuthorizationSession.build_request: user[{}], groups[{:?}]",
            user, pending.groups
        );

        self.request = Some(Arc::new(AccessRequest {
            resource: pending.resource.clone(),
            access: pending.access.clone().unwrap_or_default(),
            user,
            groups: pending.groups.clone(),
            action: pending.operation.clone(),
            request_data: pending.other_information.clone(),
            client_ip: pending.remote_address.clone(),
            access_time: chrono::Utc::now(),
        }));
        self.result = None;
        self.state = SessionState::Built;
        Ok(self)
    }

    /// Evaluate the built request with the policy engine
    pub async fn authorize(&mut self) -> Result<&mut Self> {
        let request = match (&self.request, self.state) {
            (Some(request), SessionState::Built) => Arc::clone(request),
            (None, _) => {
                return Err(AuthzError::Protocol(
                    "build_request() must be called before authorize()".to_string(),
                ))
            }
            (Some(_), state) => {
                return Err(AuthzError::Protocol(format!(
                    "authorize() called in state {:?}; build a new request first",
                    state
                )))
            }
        };

        debug!("AuthorizationSession.authorize: {}", request);

        // a detached collector suppresses capture inside the engine
        let result = self
            .engine
            .evaluate(&request, self.collector.as_ref())
            .await?;

        debug!(
            "AuthorizationSession.authorize: {}: status[{}], reason[{}]",
            request,
            if result.allowed { "allowed" } else { "denied" },
            result.reason
        );

        self.result = Some(result);
        self.state = SessionState::Evaluated;
        Ok(self)
    }

    /// Decide the built request without the engine: allowed, not audited
    pub fn known_pattern_allowed_not_audited(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<&mut Self> {
        self.short_circuit(true, reason.into())
    }

    /// Decide the built request without the engine: denied, not audited
    pub fn known_pattern_disallowed_not_audited(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<&mut Self> {
        self.short_circuit(false, reason.into())
    }

    // fast-path decisions are never audited
    fn short_circuit(&mut self, allowed: bool, reason: String) -> Result<&mut Self> {
        match (&self.request, self.state) {
            (Some(_), SessionState::Built) => {}
            (None, _) => {
                return Err(AuthzError::Protocol(
                    "build_request() must be called before a known-pattern decision".to_string(),
                ))
            }
            (Some(_), state) => {
                return Err(AuthzError::Protocol(format!(
                    "known-pattern decision in state {:?}; build a new request first",
                    state
                )))
            }
        }

        self.result = Some(AccessResult::new(allowed, false, reason));
        self.state = SessionState::Evaluated;
        Ok(self)
    }

    /// Route the selected audit events and enforce the decision
    ///
    /// On allow every captured event is forwarded and `Ok(())` returned. On
    /// deny only the most recent event is forwarded and
    /// [`AuthzError::AccessDenied`] returned.
    pub fn publish(&mut self) -> Result<()> {
        let allowed = match (&self.result, self.state) {
            (Some(result), SessionState::Evaluated) => result.allowed,
            (_, state) => {
                return Err(AuthzError::Protocol(format!(
                    "publish() requires an evaluated request, session is {:?}",
                    state
                )))
            }
        };

        if let Some(collector) = &self.collector {
            let events = collector.select_for_outcome(allowed);
            debug!(
                "Writing {} messages to audit: [{:?}]",
                events.len(),
                events.iter().map(|e| e.event_id.as_str()).collect::<Vec<_>>()
            );
            if !events.is_empty() {
                self.writer.log_events(events);
            }
        }

        self.state = SessionState::Published;

        if !allowed {
            let (user, access) = self.subject();
            let reason = self.denial_reason();
            debug!(
                "AuthorizationSession.publish: denying user[{}] access[{}]: {}",
                user, access, reason
            );
            return Err(AuthzError::AccessDenied {
                user,
                access,
                reason,
            });
        }

        Ok(())
    }

    /// Discard configured fields, request and result; keep the collector
    pub fn reset(&mut self) -> &mut Self {
        self.pending = PendingRequest::new(&self.hierarchy);
        self.request = None;
        self.result = None;
        if let Some(collector) = &self.collector {
            collector.clear();
        }
        self.state = SessionState::Configuring;
        self
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn request(&self) -> Option<&AccessRequest> {
        self.request.as_deref()
    }

    pub fn result(&self) -> Option<&AccessResult> {
        self.result.as_ref()
    }

    pub fn collector(&self) -> Option<&AuditCollector> {
        self.collector.as_ref()
    }

    /// Whether the last result allowed access; false if there is none
    pub fn is_authorized(&self) -> bool {
        match &self.result {
            Some(result) => result.allowed,
            None => {
                error!("Internal error: no access result, returning not authorized");
                false
            }
        }
    }

    /// Whether the last result is marked audited; false if there is none
    pub fn is_audited(&self) -> bool {
        match &self.result {
            Some(result) => result.audited,
            None => {
                error!(
                    "Internal error: no access result, assuming no audit. Request[{}]",
                    self.request
                        .as_deref()
                        .map(ToString::to_string)
                        .unwrap_or_default()
                );
                false
            }
        }
    }

    /// Reason of the last denial; empty when allowed or without a result
    pub fn denial_reason(&self) -> String {
        match &self.result {
            Some(result) if !result.allowed => result.reason.clone(),
            Some(_) => String::new(),
            None => {
                error!("Internal error: no access result, returning empty reason");
                String::new()
            }
        }
    }

    /// User and access verb of the evaluated request
    fn subject(&self) -> (String, String) {
        self.request
            .as_deref()
            .map(|request| (request.user.clone(), request.access.clone()))
            .unwrap_or_default()
    }
}

impl fmt::Debug for AuthorizationSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationSession")
            .field("state", &self.state)
            .field("operation", &self.pending.operation)
            .field("other_information", &self.pending.other_information)
            .field("access", &self.pending.access)
            .field("user", &self.pending.user_name)
            .field("groups", &self.pending.groups)
            .field("resource", &self.pending.resource.describe())
            .field("collector", &self.collector.as_ref().map(|c| c.len()))
            .finish()
    }
}
