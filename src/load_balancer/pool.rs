//! Backend set management.
//!
//! # Responsibilities
//! - Build backends from configuration
//! - Apply the sticky key, the exclusion and the load balancing algorithm
//! - Place recovery probes and hold back backends at their warm-up cap
//! - Hand out connection permits for the chosen backend
//!
//! # Design Decisions
//! - A failed backend's probe carries a request ahead of healthy backends
//!   only when that request can fail over if the probe fails
//! - A warming backend at its slow-start cap is chosen only when no other
//!   backend admits the request

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProxyConfig;
use crate::load_balancer::{
    backend::Backend, sticky::sticky_index, LoadBalancer, Strategy,
};
use crate::health::admission::ConnectionPermit;

/// Where failed backends whose backoff has elapsed go in the try order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOrder {
    /// Before healthy backends. For requests that may fail over.
    First,
    /// After every active backend.
    Last,
}

/// Chooses the backend for each request.
#[derive(Debug)]
pub struct BackendSelector {
    backends: Vec<Arc<Backend>>,
    index: HashMap<String, usize>,
    balancer: Box<dyn LoadBalancer>,
    strategy: Strategy,
}

impl BackendSelector {
    /// Create a selector over an ordered backend set.
    pub fn new(strategy: Strategy, backends: Vec<Arc<Backend>>) -> Self {
        let index = backends
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id.clone(), i))
            .collect();

        Self {
            backends,
            index,
            balancer: strategy.build(),
            strategy,
        }
    }

    /// Create the selector from a validated configuration.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let backends = config
            .backends
            .iter()
            .map(|b| {
                Arc::new(Backend::new(
                    b.id.clone(),
                    b.address.clone(),
                    config.load_balance.settings_for(b),
                ))
            })
            .collect::<Vec<_>>();

        tracing::info!(
            strategy = ?config.load_balance.strategy,
            backend_count = backends.len(),
            "Backend set configured"
        );

        Self::new(config.load_balance.strategy, backends)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select a backend and claim a connection slot on it, trying
    /// recovery probes only after every active backend.
    ///
    /// `sticky_key` pins the request to one backend while that backend is
    /// admissible and not busy. `exclude` is never returned.
    pub fn select(&self, sticky_key: Option<&str>, exclude: Option<&str>) -> Option<ConnectionPermit> {
        self.select_with(sticky_key, exclude, ProbeOrder::Last)
    }

    /// Like [`select`](Self::select), with explicit probe placement.
    pub fn select_with(
        &self,
        sticky_key: Option<&str>,
        exclude: Option<&str>,
        probes: ProbeOrder,
    ) -> Option<ConnectionPermit> {
        if self.backends.is_empty() {
            return None;
        }

        let excluded = |id: &str| exclude == Some(id);

        if let Some(key) = sticky_key {
            let pinned = &self.backends[sticky_index(key, self.backends.len())];
            let now = pinned.health.now();
            let usable = !excluded(pinned.id.as_str())
                && !pinned.health.is_busy(now)
                && !pinned.health.at_warmup_limit(now)
                && (probes == ProbeOrder::First || pinned.is_active());

            if usable {
                if let Some(permit) = pinned.start_connection() {
                    return Some(permit);
                }
            }

            tracing::debug!(backend = %pinned.id, "Sticky backend unavailable, balancing");
        }

        let mut ranked = self.balancer.rank(&self.backends);
        ranked.sort_by_key(|b| Self::placement(b, probes));

        for backend in ranked {
            if excluded(backend.id.as_str()) {
                continue;
            }
            if let Some(permit) = backend.start_connection() {
                return Some(permit);
            }
        }

        tracing::debug!(
            backend_count = self.backends.len(),
            excluded = ?exclude,
            "No backend available"
        );
        for b in &self.backends {
            tracing::trace!(backend = %b.id, state = %b.state(), pending = b.health.pending_count(), "Backend status");
        }
        None
    }

    /// Coarse try order applied over the strategy's ranking. The sort is
    /// stable, so the strategy still orders backends within a group.
    fn placement(backend: &Backend, probes: ProbeOrder) -> u8 {
        let health = &backend.health;

        if !backend.is_active() {
            return match probes {
                ProbeOrder::First => 0,
                ProbeOrder::Last => 3,
            };
        }
        if health.at_warmup_limit(health.now()) {
            2
        } else {
            1
        }
    }

    /// Look up a backend by id.
    pub fn backend(&self, id: &str) -> Option<&Arc<Backend>> {
        self.index.get(id).map(|&i| &self.backends[i])
    }

    /// All backends in configured order.
    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Close every backend. Used on shutdown.
    pub fn close_all(&self) {
        for backend in &self.backends {
            backend.close();
        }
    }
}
