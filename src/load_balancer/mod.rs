//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request (optional sticky key, optional excluded backend)
//!     → pool.rs (BackendSelector)
//!         - sticky.rs (pin the key to one backend while it is usable)
//!         - Apply load balancing algorithm:
//!             - adaptive.rs (least loaded, busy backends last)
//!             - round_robin.rs (rotate through backends)
//!     → backend.rs → health admission (start_connection)
//!     → Return a connection permit or None
//! ```
//!
//! # Design Decisions
//! - Algorithms only rank; admission control has the final word
//! - Disabled/closed backends never pass admission, so never get selected
//! - A failed backend is returned only when its probe is admitted

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::load_balancer::backend::Backend;

pub mod adaptive;
pub mod backend;
pub mod pool;
pub mod round_robin;
pub mod sticky;

pub use pool::{BackendSelector, ProbeOrder};

/// Orders backends for one selection.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Backends in the order they should be tried.
    fn rank(&self, backends: &[Arc<Backend>]) -> Vec<Arc<Backend>>;
}

/// Named selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    #[default]
    #[serde(alias = "least-connection")]
    Adaptive,
    RoundRobin,
}

impl Strategy {
    pub fn build(self) -> Box<dyn LoadBalancer> {
        match self {
            Strategy::Adaptive => Box::new(adaptive::Adaptive::new()),
            Strategy::RoundRobin => Box::new(round_robin::RoundRobin::new()),
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "adaptive" | "least-connection" => Ok(Strategy::Adaptive),
            "round-robin" => Ok(Strategy::RoundRobin),
            other => Err(format!(
                "'{}' is an unknown load-balance strategy; expected 'adaptive', 'least-connection' or 'round-robin'",
                other
            )),
        }
    }
}
