//! Error types for audit delivery

use thiserror::Error;

/// Audit delivery errors
///
/// None of these reach an enqueuing producer; they surface from sinks and
/// configuration and are logged by the delivery loop.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Sink is not connected or no broker could be reached
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),

    /// I/O error talking to the sink
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid delivery configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for audit delivery operations
pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DeliveryError::Unavailable("127.0.0.1:1: connection refused".into());
        assert_eq!(
            err.to_string(),
            "Audit sink unavailable: 127.0.0.1:1: connection refused"
        );

        let err = DeliveryError::Config("max_queue_size must be positive".into());
        assert!(err.to_string().starts_with("Invalid configuration"));
    }

    #[test]
    fn test_from_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone");
        assert!(matches!(DeliveryError::from(io), DeliveryError::Io(_)));

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(DeliveryError::from(json), DeliveryError::Serialization(_)));
    }
}
