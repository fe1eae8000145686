//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → timeouts.rs (enforce connect/socket deadline)
//!     → On failure: backoff.rs (grow the recover timeout)
//!     → retries.rs (may the request fail over to another backend?)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every backend call has a deadline
//! - Failover only for replayable requests with nothing committed
//! - At most one failover hop per request

pub mod backoff;
pub mod retries;
pub mod timeouts;
