//! Error types shared across the collaborator seams.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the transport/protocol layer.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket could not be constructed or connected.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The protocol version descriptor could not be fetched.
    #[error("Version fetch failed: {0}")]
    VersionFetch(String),

    /// A request on an established socket failed.
    #[error("Request failed: {0}")]
    Request(String),

    /// The socket is already closed.
    #[error("Socket closed")]
    Closed,

    /// The operation did not complete in time.
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// Key store I/O failed.
    #[error("Key store error: {0}")]
    KeyStore(String),
}

impl TransportError {
    /// Check if retrying on a fresh connection may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::VersionFetch(_) | Self::Timeout(_) | Self::Closed
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors raised by the dispatch layer. The supervisor only logs these.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A handler failed.
    #[error("Handler `{handler}` failed: {message}")]
    Handler {
        /// Handler name.
        handler: String,
        /// Failure detail.
        message: String,
    },

    /// The command registry could not be loaded.
    #[error("Command registry error: {0}")]
    Registry(String),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors raised while sending a heartbeat report.
///
/// The three variants only matter for logging; they count identically
/// toward the reporter's failure threshold.
#[derive(Error, Debug)]
pub enum HeartbeatError {
    /// The monitor answered with a non-success status.
    #[error("Heartbeat rejected ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the response body, if any.
        message: String,
    },

    /// The monitor could not be reached (connect failure, timeout).
    #[error("No response from heartbeat server: {0}")]
    Unreachable(String),

    /// The request could not be built locally.
    #[error("Error sending heartbeat: {0}")]
    Request(String),
}

impl HeartbeatError {
    /// Short classification label used in log fields.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Unreachable(_) => "unreachable",
            Self::Request(_) => "request",
        }
    }
}

/// Result type for heartbeat reports.
pub type HeartbeatResult<T> = Result<T, HeartbeatError>;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("Invalid configuration: {0}")]
    Parse(String),

    /// One or more values failed validation.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_error_display() {
        let e = HeartbeatError::Status {
            status: 401,
            message: "bad key".into(),
        };
        assert_eq!(e.to_string(), "Heartbeat rejected (401): bad key");
        assert_eq!(e.kind(), "status");
    }

    #[test]
    fn heartbeat_error_kinds_are_distinct() {
        assert_eq!(HeartbeatError::Unreachable("x".into()).kind(), "unreachable");
        assert_eq!(HeartbeatError::Request("x".into()).kind(), "request");
    }

    #[test]
    fn transport_error_retryable() {
        assert!(TransportError::ConnectionFailed("refused".into()).is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(!TransportError::Request("bad".into()).is_retryable());
    }

    #[test]
    fn config_error_joins_problems() {
        let e = ConfigError::Invalid(vec!["a".into(), "b".into()]);
        assert_eq!(e.to_string(), "Invalid configuration: a; b");
    }
}
