//! Backend health tracking.
//!
//! # Data Flow
//! ```text
//! Attempt outcome (proxy controller):
//!     success → tracker.rs (timestamps, recover timeout reset)
//!     failure → tracker.rs (grow recover timeout) → state.rs (ACTIVE → FAIL)
//!     busy    → tracker.rs (busy window)
//!
//! New connection attempt (load balancer):
//!     → admission.rs (active: admit / failed: one probe after backoff)
//!     → connection up → state.rs (FAIL → ACTIVE)
//!
//! Operator (admin API):
//!     → state.rs (enable / disable / close)
//! ```
//!
//! # Design Decisions
//! - Health is passive: it is driven by real traffic, never by a prober
//! - The state machine is a pure function applied through a CAS loop
//! - Time comes from a `Clock` so windows are testable without sleeping

pub mod admission;
pub mod clock;
pub mod state;
pub mod tracker;

pub use admission::{AdmissionDenied, ConnectionPermit};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use state::{HealthEvent, HealthState};
pub use tracker::{BackendHealth, HealthPolicy, HealthSnapshot};
