//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream server and its tuning
//! - Own the backend's health state (see `crate::health`)
//! - Log and meter every health transition

use std::sync::Arc;
use std::time::Duration;

use crate::health::clock::{Clock, MonotonicClock};
use crate::health::state::HealthState;
use crate::health::tracker::{BackendHealth, HealthPolicy, HealthSnapshot};
use crate::observability::metrics;

/// Per-backend tuning, resolved from the global and per-backend config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    /// How long a released connection may sit idle before it is discarded.
    pub idle_time: Duration,
    /// Relative weight for adaptive balancing.
    pub weight: u32,
    pub health: HealthPolicy,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(30),
            idle_time: Duration::from_secs(10),
            weight: 100,
            health: HealthPolicy::default(),
        }
    }
}

/// A single backend server.
#[derive(Debug)]
pub struct Backend {
    /// Stable, human-readable identifier.
    pub id: String,
    /// Upstream address (`host:port`).
    pub address: String,
    pub settings: BackendSettings,
    pub health: BackendHealth,
}

impl Backend {
    /// Create a new backend.
    pub fn new(id: impl Into<String>, address: impl Into<String>, settings: BackendSettings) -> Self {
        Self::with_clock(id, address, settings, MonotonicClock::shared())
    }

    /// Create a backend reading time from `clock`.
    pub fn with_clock(
        id: impl Into<String>,
        address: impl Into<String>,
        settings: BackendSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let health = BackendHealth::new(settings.health, clock);
        Self {
            id: id.into(),
            address: address.into(),
            settings,
            health,
        }
    }

    pub fn state(&self) -> HealthState {
        self.health.state()
    }

    pub fn is_active(&self) -> bool {
        self.health.is_active()
    }

    /// In-flight attempts scaled by weight. Lower is better.
    pub fn load_score(&self) -> f64 {
        self.health.pending_count() as f64 / self.settings.weight.max(1) as f64
    }

    // --- Health callbacks ---

    /// Report a successful request.
    pub fn on_success(&self) {
        self.health.on_success();
        metrics::record_backend_health(&self.id, self.state(), self.health.dynamic_recover_timeout());
    }

    /// Report a failed request or connection attempt.
    pub fn on_fail(&self) {
        let (prev, next) = self.health.on_fail();
        let recover_ms = self.health.dynamic_recover_timeout();

        if prev != next {
            tracing::warn!(
                backend = %self.id,
                from = %prev,
                to = %next,
                recover_timeout_ms = recover_ms,
                "Backend marked failed"
            );
        } else {
            tracing::debug!(backend = %self.id, state = %next, recover_timeout_ms = recover_ms, "Backend failure recorded");
        }

        metrics::record_backend_health(&self.id, next, recover_ms);
    }

    /// Report a busy answer (e.g. HTTP 503).
    pub fn on_busy(&self) {
        self.health.on_busy();
        tracing::debug!(backend = %self.id, "Backend reported busy");
    }

    // --- Administration ---

    pub fn enable(&self) -> HealthState {
        self.admin_transition("enable", self.health.enable())
    }

    pub fn disable(&self) -> HealthState {
        self.admin_transition("disable", self.health.disable())
    }

    pub fn close(&self) -> HealthState {
        self.admin_transition("close", self.health.close())
    }

    fn admin_transition(&self, action: &str, (prev, next): (HealthState, HealthState)) -> HealthState {
        if prev != next {
            tracing::info!(backend = %self.id, action, from = %prev, to = %next, "Backend state changed");
        } else {
            tracing::debug!(backend = %self.id, action, state = %next, "Backend state unchanged");
        }
        metrics::record_backend_health(&self.id, next, self.health.dynamic_recover_timeout());
        next
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.health.snapshot()
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.id, self.address)
    }
}
