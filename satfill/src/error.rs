//! Error types for the fetch pipeline
//!
//! Every transport failure a remote store can hit is classified into exactly
//! one [`FetchError`] variant. The class decides whether the coordinator
//! retries the slot.

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Per-slot fetch error
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message")]
pub enum FetchError {
    /// Remote has no data for the slot (permanent)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials rejected (permanent)
    #[error("Authentication failed: {0}")]
    AuthFailure(String),

    /// Request or attempt exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Any other transport or local I/O failure; message kept for diagnostics
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Remote asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Local setup prevents producing the raster at all (permanent)
    #[error("Not configured: {0}")]
    Misconfigured(String),
}

impl FetchError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::NetworkError(_) | FetchError::RateLimited(_)
        )
    }

    /// Short class name, stable across messages
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotFound(_) => "NotFound",
            FetchError::AuthFailure(_) => "AuthFailure",
            FetchError::Timeout(_) => "Timeout",
            FetchError::NetworkError(_) => "NetworkError",
            FetchError::RateLimited(_) => "RateLimited",
            FetchError::Misconfigured(_) => "Misconfigured",
        }
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, context: &str) -> Self {
        let message = format!("HTTP {} for {}", status.as_u16(), context);
        match status {
            StatusCode::NOT_FOUND => FetchError::NotFound(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::AuthFailure(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                FetchError::Timeout(message)
            }
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                FetchError::RateLimited(message)
            }
            _ => FetchError::NetworkError(message),
        }
    }

    /// Classify a reqwest transport error
    pub fn from_reqwest(err: reqwest::Error, context: &str) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout(format!("{}: {}", context, err));
        }
        if let Some(status) = err.status() {
            return FetchError::from_status(status, context);
        }
        FetchError::NetworkError(format!("{}: {}", context, err))
    }

    /// Local I/O failure while producing the raster
    pub fn from_io(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::TimedOut {
            return FetchError::Timeout(format!("{}: {}", context, err));
        }
        FetchError::NetworkError(format!("{}: {}", context, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let ctx = "GOES16/FD-C13/2024-03-05T12:00Z";
        assert!(matches!(
            FetchError::from_status(StatusCode::NOT_FOUND, ctx),
            FetchError::NotFound(_)
        ));
        assert!(matches!(
            FetchError::from_status(StatusCode::FORBIDDEN, ctx),
            FetchError::AuthFailure(_)
        ));
        assert!(matches!(
            FetchError::from_status(StatusCode::UNAUTHORIZED, ctx),
            FetchError::AuthFailure(_)
        ));
        assert!(matches!(
            FetchError::from_status(StatusCode::GATEWAY_TIMEOUT, ctx),
            FetchError::Timeout(_)
        ));
        assert!(matches!(
            FetchError::from_status(StatusCode::TOO_MANY_REQUESTS, ctx),
            FetchError::RateLimited(_)
        ));
        assert!(matches!(
            FetchError::from_status(StatusCode::SERVICE_UNAVAILABLE, ctx),
            FetchError::RateLimited(_)
        ));
        match FetchError::from_status(StatusCode::INTERNAL_SERVER_ERROR, ctx) {
            FetchError::NetworkError(msg) => {
                assert!(msg.contains("500"));
                assert!(msg.contains(ctx));
            }
            other => panic!("expected NetworkError, got {:?}", other),
        }
    }

    #[test]
    fn test_permanent_errors_are_not_retryable() {
        assert!(!FetchError::NotFound("x".into()).is_retryable());
        assert!(!FetchError::AuthFailure("x".into()).is_retryable());
        assert!(FetchError::Timeout("x".into()).is_retryable());
        assert!(FetchError::NetworkError("x".into()).is_retryable());
        assert!(FetchError::RateLimited("x".into()).is_retryable());
        assert!(!FetchError::Misconfigured("x".into()).is_retryable());
    }

    #[test]
    fn test_misconfigured_serializes_with_kind() {
        let err = FetchError::Misconfigured("no renderer".into());
        assert_eq!(err.kind(), "Misconfigured");
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"kind": "Misconfigured", "message": "no renderer"})
        );
    }

    #[test]
    fn test_io_timeout_maps_to_timeout() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow disk");
        assert!(matches!(FetchError::from_io(err, "write"), FetchError::Timeout(_)));
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert_eq!(FetchError::from_io(err, "write").kind(), "NetworkError");
    }
}
