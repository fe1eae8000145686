//! Adaptive load balancing strategy.
//!
//! Backends are grouped into tiers and tried tier by tier:
//! 1. active backends outside their busy window, least loaded first
//! 2. active backends that answered busy recently
//! 3. everything else (failed, disabled, closed)
//!
//! Load is in-flight attempts divided by weight; ties keep config order.
//! Probe placement and the warm-up cap are applied by the selector on top
//! of this order.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, LoadBalancer};

/// Least-loaded selector that steers around busy backends.
#[derive(Debug, Default)]
pub struct Adaptive;

impl Adaptive {
    pub fn new() -> Self {
        Self
    }

    fn tier(backend: &Backend) -> u8 {
        let health = &backend.health;

        if !health.state().is_active() {
            2
        } else if health.is_busy(health.now()) {
            1
        } else {
            0
        }
    }
}

impl LoadBalancer for Adaptive {
    fn rank(&self, backends: &[Arc<Backend>]) -> Vec<Arc<Backend>> {
        let mut ranked: Vec<(u8, f64, Arc<Backend>)> = backends
            .iter()
            .map(|b| (Self::tier(b), b.load_score(), b.clone()))
            .collect();

        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        ranked.into_iter().map(|(_, _, b)| b).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::clock::ManualClock;
    use crate::load_balancer::backend::BackendSettings;

    fn backends(clock: &Arc<ManualClock>, n: usize) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| {
                Arc::new(Backend::with_clock(
                    format!("b{}", i),
                    format!("127.0.0.1:{}", 9000 + i),
                    BackendSettings::default(),
                    clock.clone(),
                ))
            })
            .collect()
    }

    fn ids(ranked: &[Arc<Backend>]) -> Vec<&str> {
        ranked.iter().map(|b| b.id.as_str()).collect()
    }

    #[test]
    fn test_least_loaded_first() {
        let clock = Arc::new(ManualClock::new(1));
        let set = backends(&clock, 3);
        let lb = Adaptive::new();

        let _p0 = set[0].start_connection();
        let _p1 = set[0].start_connection();
        let _p2 = set[1].start_connection();

        assert_eq!(ids(&lb.rank(&set)), vec!["b2", "b1", "b0"]);
    }

    #[test]
    fn test_active_backend_ahead_of_failed() {
        let clock = Arc::new(ManualClock::new(1));
        let set = backends(&clock, 2);
        let lb = Adaptive::new();

        set[0].on_fail();
        assert_eq!(ids(&lb.rank(&set)), vec!["b1", "b0"]);

        // an elapsed backoff window does not put b0 ahead of a healthy backend
        clock.advance(2_000);
        assert_eq!(ids(&lb.rank(&set)), vec!["b1", "b0"]);
    }

    #[test]
    fn test_busy_backend_sinks() {
        let clock = Arc::new(ManualClock::new(1));
        let set = backends(&clock, 2);
        let lb = Adaptive::new();

        set[0].on_busy();
        assert_eq!(ids(&lb.rank(&set)), vec!["b1", "b0"]);

        clock.advance(15_000);
        assert_eq!(ids(&lb.rank(&set)), vec!["b0", "b1"]);
    }
}
