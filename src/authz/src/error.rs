//! Error types for the authorization session

use thiserror::Error;

/// Authorization session errors
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Required session fields missing or inconsistent at build time
    #[error("Incomplete/inconsistent state: {0}. Can't build access request")]
    Configuration(String),

    /// Session steps invoked out of order
    #[error("Invalid state transition: {0}")]
    Protocol(String),

    /// The policy decision was a denial
    #[error("Insufficient permissions for user '{user}' (action={access}): {reason}")]
    AccessDenied {
        user: String,
        access: String,
        reason: String,
    },

    /// The policy engine failed to produce a result
    #[error("Policy evaluation failed: {0}")]
    Evaluation(String),
}

impl AuthzError {
    /// True for the expected "request rejected" outcome
    pub fn is_access_denied(&self) -> bool {
        matches!(self, AuthzError::AccessDenied { .. })
    }

    /// True for caller programming errors that must not be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuthzError::Configuration(_) | AuthzError::Protocol(_))
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
