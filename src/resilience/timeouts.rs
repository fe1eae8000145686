//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend I/O with the connect and socket deadlines
//! - Report which deadline fired
//!
//! A timeout is an ordinary transport failure to the caller: it feeds the
//! same backoff as a refused connection.

use std::future::Future;
use std::time::Duration;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Socket,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Connect => f.write_str("connect"),
            TimeoutKind::Socket => f.write_str("socket"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} timeout after {}ms", limit.as_millis())]
pub struct TimeoutError {
    pub kind: TimeoutKind,
    pub limit: Duration,
}

/// Run `fut` under a deadline of `limit`.
pub async fn with_deadline<F: Future>(
    kind: TimeoutKind,
    limit: Duration,
    fut: F,
) -> Result<F::Output, TimeoutError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TimeoutError { kind, limit })
}
