//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Init logging/metrics → Build server → Listen
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain requests → Close backends → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, close
//! - Backends are CLOSED after draining so nothing new reaches them

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
