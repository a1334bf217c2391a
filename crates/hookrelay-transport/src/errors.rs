//! Transport error types.

use thiserror::Error;

/// Errors from bot transports and the transport registry.
///
/// Variants carry owned strings so one error can be cloned to every
/// waiter failed by the same event.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established within the retry budget.
    #[error("failed to connect to {url} after {attempts} attempt(s): {reason}")]
    Connect {
        /// Endpoint that was dialled.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },

    /// No response arrived before the deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// The transport was closed or the connection dropped while the
    /// request was outstanding.
    #[error("transport closed: {reason}")]
    Closed {
        /// Why the request could not complete.
        reason: String,
    },

    /// The persistent connection is down and being re-established.
    #[error("transport {name} is not connected")]
    NotConnected {
        /// Transport name.
        name: String,
    },

    /// HTTP-level failure (connection refused, reset, DNS, ...).
    #[error("http request failed: {0}")]
    Http(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The endpoint answered with something that is not a valid response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(String),

    /// Registry misuse (duplicate name without replacement).
    #[error("transport {name} is already registered")]
    Registration {
        /// Conflicting name.
        name: String,
    },

    /// The destination's target type is not one the protocol supports.
    #[error("unsupported target type: {target_type}")]
    UnsupportedTarget {
        /// Offending target type.
        target_type: String,
    },
}

impl TransportError {
    /// Build a [`TransportError::Closed`].
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connect { .. }
            | Self::Timeout { .. }
            | Self::Closed { .. }
            | Self::NotConnected { .. }
            | Self::Http(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Protocol(_)
            | Self::Encode(_)
            | Self::Registration { .. }
            | Self::UnsupportedTarget { .. } => false,
        }
    }
}

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_display() {
        let err = TransportError::Connect {
            url: "ws://127.0.0.1:3001".into(),
            attempts: 5,
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to ws://127.0.0.1:3001 after 5 attempt(s): connection refused"
        );
    }

    #[test]
    fn timeout_display() {
        let err = TransportError::Timeout { timeout_ms: 30_000 };
        assert_eq!(err.to_string(), "request timed out after 30000ms");
    }

    #[test]
    fn closed_helper() {
        let err = TransportError::closed("connection lost");
        assert_eq!(err.to_string(), "transport closed: connection lost");
    }

    #[test]
    fn status_display() {
        let err = TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(err.to_string().contains("HTTP 502"));
    }

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Timeout { timeout_ms: 1 }.is_retryable());
        assert!(TransportError::closed("x").is_retryable());
        assert!(TransportError::Http("reset".into()).is_retryable());
        assert!(
            TransportError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !TransportError::Status {
                status: 403,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !TransportError::UnsupportedTarget {
                target_type: "channel".into()
            }
            .is_retryable()
        );
        assert!(!TransportError::Protocol("bad".into()).is_retryable());
    }
}
