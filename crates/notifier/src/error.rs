//! Delivery failure taxonomy.
//!
//! Every failed attempt is classified as either a client rejection (the
//! homeserver refused the message itself, dropped without retry) or a transient
//! failure (requeued and retried after backoff). Unrecognised error shapes are
//! retried like transient ones.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors returned by a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The remote endpoint rejected the request (4xx).
    #[error("client error: HTTP {status_code}: {message}")]
    ClientError { status_code: u16, message: String },

    /// The remote endpoint failed to process the request (5xx).
    #[error("server error: HTTP {status_code}: {message}")]
    ServerError { status_code: u16, message: String },

    /// The request never produced a response.
    #[error("network error: {message}")]
    Network { message: String },

    /// The request exceeded the transport timeout.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Anything else, e.g. an unexpected status code or a malformed response.
    #[error("unexpected delivery failure: {message}")]
    Unexpected { message: String },
}

/// How the worker reacts to a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Terminal: the entry is dropped and the backoff left untouched.
    ClientRejected,
    /// Recoverable: the entry is requeued and the worker backs off.
    Transient,
    /// Unrecognised failure, handled like [`FailureClass::Transient`].
    Unexpected,
}

impl DeliveryError {
    pub fn client(status_code: u16, message: impl Into<String>) -> Self {
        Self::ClientError {
            status_code,
            message: message.into(),
        }
    }

    pub fn server(status_code: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status_code,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn timeout(timeout_secs: u64) -> Self {
        Self::Timeout { timeout_secs }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected {
            message: message.into(),
        }
    }

    /// Build the error matching an HTTP status that was not a success.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        match status_code {
            400..=499 => Self::client(status_code, message),
            500..=599 => Self::server(status_code, message),
            _ => Self::unexpected(format!("HTTP {status_code}: {}", message.into())),
        }
    }

    /// Classify the failure for the retry decision.
    ///
    /// Only a `ClientError` carrying a 4xx status is terminal. A `ClientError`
    /// constructed with any other code does not match that contract and falls
    /// back to `Unexpected`.
    ///
    /// This includes 429 (`M_LIMIT_EXCEEDED`): a rate-limited message is
    /// dropped, not retried. Rate limiting only stalls the worker when it
    /// shows up as a 5xx, a timeout or a network failure.
    pub fn classify(&self) -> FailureClass {
        match self {
            Self::ClientError { status_code, .. } if (400..500).contains(status_code) => {
                FailureClass::ClientRejected
            }
            Self::ClientError { .. } | Self::Unexpected { .. } => FailureClass::Unexpected,
            Self::ServerError { .. } | Self::Network { .. } | Self::Timeout { .. } => {
                FailureClass::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.classify() != FailureClass::ClientRejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_are_terminal() {
        for code in [400, 401, 403, 404, 413, 499] {
            let err = DeliveryError::client(code, "rejected");
            assert_eq!(err.classify(), FailureClass::ClientRejected, "code {code}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_rate_limited_is_dropped() {
        let err = DeliveryError::from_status(429, "M_LIMIT_EXCEEDED: Too many requests");
        assert_eq!(err.classify(), FailureClass::ClientRejected);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_client_error_outside_4xx_is_retried() {
        let err = DeliveryError::client(302, "redirect");
        assert_eq!(err.classify(), FailureClass::Unexpected);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transient_errors() {
        assert_eq!(DeliveryError::server(502, "bad gateway").classify(), FailureClass::Transient);
        assert_eq!(DeliveryError::network("refused").classify(), FailureClass::Transient);
        assert_eq!(DeliveryError::timeout(30).classify(), FailureClass::Transient);
        assert_eq!(DeliveryError::unexpected("weird").classify(), FailureClass::Unexpected);
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            DeliveryError::from_status(429, "slow down"),
            DeliveryError::ClientError { status_code: 429, .. }
        ));
        assert!(matches!(
            DeliveryError::from_status(503, "unavailable"),
            DeliveryError::ServerError { status_code: 503, .. }
        ));
        assert!(matches!(DeliveryError::from_status(304, ""), DeliveryError::Unexpected { .. }));
    }
}
