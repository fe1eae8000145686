//! Attempt outcomes and the request-level error taxonomy.

use axum::http::StatusCode;

use crate::resilience::retries::RetryBlock;

/// Result of one proxy attempt against one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The backend answered. `keep_alive` says whether the connection can
    /// go back to the idle pool.
    Ok { keep_alive: bool },
    /// The backend signaled overload.
    Busy { message: String },
    /// Connect/socket timeout, reset, or protocol error.
    Fail { message: String },
}

impl RequestOutcome {
    pub fn fail(message: impl Into<String>) -> Self {
        RequestOutcome::Fail {
            message: message.into(),
        }
    }

    pub fn busy(message: impl Into<String>) -> Self {
        RequestOutcome::Busy {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RequestOutcome::Ok { .. })
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Ok { .. } => "ok",
            RequestOutcome::Busy { .. } => "busy",
            RequestOutcome::Fail { .. } => "fail",
        }
    }
}

/// Final, caller-visible failure of a proxied request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend {backend} is busy: {message}")]
    Busy { backend: String, message: String },

    #[error("backend {backend} failed: {message}")]
    TransportFailure { backend: String, message: String },

    #[error("backend {backend} failed and the request was not retried ({reason}): {message}")]
    NonIdempotentFailure {
        backend: String,
        message: String,
        reason: RetryBlock,
    },
}

impl ProxyError {
    /// Status code sent to the client when nothing was committed yet.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::NoBackendAvailable | ProxyError::Busy { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ProxyError::TransportFailure { .. } | ProxyError::NonIdempotentFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Backend of the surfaced attempt, if any was made.
    pub fn backend(&self) -> Option<&str> {
        match self {
            ProxyError::NoBackendAvailable => None,
            ProxyError::Busy { backend, .. }
            | ProxyError::TransportFailure { backend, .. }
            | ProxyError::NonIdempotentFailure { backend, .. } => Some(backend),
        }
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ProxyError::NoBackendAvailable => "no_backend",
            ProxyError::Busy { .. } => "busy",
            ProxyError::TransportFailure { .. } => "transport_failure",
            ProxyError::NonIdempotentFailure { .. } => "non_idempotent_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ProxyError::NoBackendAvailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        let busy = ProxyError::Busy {
            backend: "b1".into(),
            message: "503".into(),
        };
        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);
        let fail = ProxyError::TransportFailure {
            backend: "b1".into(),
            message: "connection refused".into(),
        };
        assert_eq!(fail.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(fail.to_string(), "backend b1 failed: connection refused");
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RequestOutcome::Ok { keep_alive: true }.label(), "ok");
        assert_eq!(RequestOutcome::busy("x").label(), "busy");
        assert_eq!(RequestOutcome::fail("x").label(), "fail");
        assert!(!RequestOutcome::fail("x").is_ok());
    }
}
