//! Error types for the mesh hub

use thiserror::Error;
use uuid::Uuid;

/// Hub errors
#[derive(Debug, Error)]
pub enum HubError {
    /// The link's transport has already been torn down.
    #[error("Link gone")]
    LinkGone,

    #[error("Tracked request timed out")]
    TrackingTimeout,

    #[error("Tracked request cancelled by shutdown")]
    TrackingCancelled,

    #[error("Tracking id already pending: {0}")]
    DuplicateTrackingId(Uuid),

    #[error("Unable to establish connection to {host}:{port}: {reason}")]
    ConnectionFailed {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Hub is shut down")]
    ShutDown,

    #[error("Unknown service id: {0}")]
    UnknownService(u32),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    pub fn connection_failed(host: impl Into<String>, port: u16, reason: impl ToString) -> Self {
        HubError::ConnectionFailed {
            host: host.into(),
            port,
            reason: reason.to_string(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        HubError::ProtocolError(message.into())
    }

    /// Whether this error is an expected consequence of peer churn
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HubError::LinkGone | HubError::TrackingTimeout | HubError::ConnectionFailed { .. }
        )
    }
}

// Convert from standard library errors
impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::NetworkError(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::SerializationError(err.to_string())
    }
}

impl From<config::ConfigError> for HubError {
    fn from(err: config::ConfigError) -> Self {
        HubError::ConfigError(err.to_string())
    }
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(HubError::LinkGone.is_transient());
        assert!(HubError::connection_failed("localhost", 6000, "refused").is_transient());
        assert!(!HubError::TrackingCancelled.is_transient());
        assert!(!HubError::protocol("bad banner").is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = HubError::connection_failed("10.0.0.1", 6000, "refused");
        assert_eq!(
            err.to_string(),
            "Unable to establish connection to 10.0.0.1:6000: refused"
        );
    }
}
