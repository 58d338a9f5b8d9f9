//! Policy engine contract
//!
//! Resource matching and rule evaluation live outside this crate; the
//! session only needs something that turns an [`AccessRequest`] into an
//! [`AccessResult`].

use async_trait::async_trait;

use crate::collector::AuditCollector;
use crate::error::Result;
use crate::types::{AccessRequest, AccessResult};

/// Evaluates access requests
///
/// Implementations must be safe to call concurrently from independent
/// sessions. When `collector` is `Some`, every audit event produced during
/// this evaluation is captured into it, in order; `None` means auditing is
/// suppressed for this call.
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn evaluate(
        &self,
        request: &AccessRequest,
        collector: Option<&AuditCollector>,
    ) -> Result<AccessResult>;
}
