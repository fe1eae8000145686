//! Request proxying with failover.
//!
//! # Data Flow
//! ```text
//! ProxyRequest (buffered) + ResponseSink
//!     → controller.rs
//!         - select a backend (load_balancer)
//!         - open + send through the connection pool (upstream)
//!         - outcome.rs classifies: ok / busy / fail
//!         - feed health, maybe fail over once
//!     → ProxyReport or ProxyError
//! ```

pub mod controller;
pub mod exchange;
pub mod outcome;

pub use controller::{FailoverProxyController, ProxyReport};
pub use exchange::{BufferedResponse, ProxyRequest, ResponseSink, SinkClosed, StickySource};
pub use outcome::{ProxyError, RequestOutcome};
