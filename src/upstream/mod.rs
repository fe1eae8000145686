//! Upstream connection subsystem.
//!
//! # Data Flow
//! ```text
//! FailoverProxyController
//!     → ConnectionPool::open (idle reuse or new connect, connect timeout)
//!     → UpstreamConnection::send (socket timeout, streams into the sink)
//!     → RequestOutcome
//!     → ConnectionPool::release (keep-alive) or ConnectionPool::close
//! ```
//!
//! # Design Decisions
//! - The controller only sees these traits; tests swap in scripted pools
//! - Opening a connection never touches health state; the controller does
//! - A failed backend's idle connections are purged, not reused
//! - A reused connection that fails before the backend answers is retried
//!   once on a new connection and does not count against health

pub mod http;

use std::future::Future;
use std::sync::Arc;

use crate::load_balancer::backend::Backend;
use crate::proxy::exchange::{ProxyRequest, ResponseSink};
use crate::proxy::outcome::RequestOutcome;

pub use self::http::HttpConnectionPool;

/// Failure to obtain a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpenError {
    /// The backend refused for lack of capacity.
    #[error("backend busy: {0}")]
    Busy(String),
    /// Connect error or connect timeout.
    #[error("connect failed: {0}")]
    Fail(String),
}

/// One connection to a backend, able to carry a request.
pub trait UpstreamConnection: Send + 'static {
    /// Forward `request` and stream the answer into `response`.
    fn send<S: ResponseSink>(
        &mut self,
        request: &ProxyRequest,
        response: &mut S,
    ) -> impl Future<Output = RequestOutcome> + Send;

    /// Whether this connection came from the idle pool.
    fn is_reused(&self) -> bool {
        false
    }

    /// Whether the backend sent a response head on this connection.
    /// Connections that do not track it report `true`.
    fn response_started(&self) -> bool {
        true
    }
}

/// Source of upstream connections.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: UpstreamConnection;

    /// Reuse an idle connection or open a new one.
    fn open(
        &self,
        backend: &Arc<Backend>,
    ) -> impl Future<Output = Result<Self::Connection, OpenError>> + Send;

    /// Open a new connection, skipping idle ones.
    fn open_new(
        &self,
        backend: &Arc<Backend>,
    ) -> impl Future<Output = Result<Self::Connection, OpenError>> + Send;

    /// Return a healthy connection for reuse.
    fn release(&self, conn: Self::Connection);

    /// Discard a connection.
    fn close(&self, conn: Self::Connection);

    /// Drop every idle connection to `backend`.
    fn purge(&self, _backend: &Backend) {}
}

impl From<OpenError> for RequestOutcome {
    fn from(err: OpenError) -> Self {
        match err {
            OpenError::Busy(message) => RequestOutcome::Busy { message },
            OpenError::Fail(message) => RequestOutcome::Fail { message },
        }
    }
}
