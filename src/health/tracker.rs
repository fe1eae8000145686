//! Per-backend health bookkeeping.
//!
//! # Responsibilities
//! - Hold the state machine cell and the failure/success timestamps
//! - Grow and reset the dynamic recover timeout
//! - Track busy signals, warm-up and lifetime counters
//!
//! Every field is an atomic and every update is a single RMW or a
//! read-compute-CAS loop, so request tasks never block each other here.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::health::clock::Clock;
use crate::health::state::{AtomicHealthState, HealthEvent, HealthState};
use crate::resilience::backoff::{
    next_recover_timeout, warmup_connection_limit, RECOVER_TIMEOUT_FLOOR_MS,
};

/// Timing knobs for one backend, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Ceiling for the dynamic recover timeout.
    pub recover_time_ms: u64,
    /// How long a busy answer keeps the backend deprioritized.
    pub busy_recover_time_ms: u64,
    /// Slow-start period after recovering from a failure. 0 disables it.
    pub warmup_time_ms: u64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            recover_time_ms: 15_000,
            busy_recover_time_ms: 15_000,
            warmup_time_ms: 60_000,
        }
    }
}

/// Health state of one backend.
#[derive(Debug)]
pub struct BackendHealth {
    pub(crate) state: AtomicHealthState,
    pub(crate) policy: HealthPolicy,
    pub(crate) clock: Arc<dyn Clock>,

    recover_floor_ms: u64,
    dynamic_recover_timeout: AtomicU64,

    first_fail_time: AtomicU64,
    last_fail_time: AtomicU64,
    first_success_time: AtomicU64,
    last_success_time: AtomicU64,
    last_busy_time: AtomicU64,

    /// In-flight connection attempts.
    pub(crate) pending: AtomicUsize,

    connect_count_total: AtomicU64,
    keepalive_count_total: AtomicU64,
    success_count_total: AtomicU64,
    fail_count_total: AtomicU64,
    busy_count_total: AtomicU64,
}

impl BackendHealth {
    pub fn new(policy: HealthPolicy, clock: Arc<dyn Clock>) -> Self {
        let recover_floor_ms = RECOVER_TIMEOUT_FLOOR_MS.min(policy.recover_time_ms);

        Self {
            state: AtomicHealthState::new(HealthState::Active),
            policy,
            clock,
            recover_floor_ms,
            dynamic_recover_timeout: AtomicU64::new(recover_floor_ms),
            first_fail_time: AtomicU64::new(0),
            last_fail_time: AtomicU64::new(0),
            first_success_time: AtomicU64::new(0),
            last_success_time: AtomicU64::new(0),
            last_busy_time: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            connect_count_total: AtomicU64::new(0),
            keepalive_count_total: AtomicU64::new(0),
            success_count_total: AtomicU64::new(0),
            fail_count_total: AtomicU64::new(0),
            busy_count_total: AtomicU64::new(0),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn state(&self) -> HealthState {
        self.state.load()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// A request against this backend succeeded.
    ///
    /// Pure bookkeeping: the state only returns to Active through a
    /// successful admission (see [`BackendHealth::mark_connected`]).
    pub fn on_success(&self) {
        let now = self.now();

        let _ = self
            .first_success_time
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire);
        self.last_success_time.store(now, Ordering::Release);
        self.dynamic_recover_timeout
            .store(self.recover_floor_ms, Ordering::Release);
        self.first_fail_time.store(0, Ordering::Release);
        self.success_count_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection or request against this backend failed.
    ///
    /// Returns the `(previous, next)` state pair.
    pub fn on_fail(&self) -> (HealthState, HealthState) {
        let now = self.now();

        self.last_fail_time.store(now, Ordering::Release);
        let _ = self
            .first_fail_time
            .compare_exchange(0, now, Ordering::AcqRel, Ordering::Acquire);
        self.first_success_time.store(0, Ordering::Release);
        self.fail_count_total.fetch_add(1, Ordering::Relaxed);

        let transition = self.state.apply(HealthEvent::Fail);

        let ceiling = self.policy.recover_time_ms;
        let mut prev = self.dynamic_recover_timeout.load(Ordering::Acquire);
        loop {
            let next = next_recover_timeout(prev, ceiling);
            if next == prev {
                break;
            }
            match self.dynamic_recover_timeout.compare_exchange_weak(
                prev,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => prev = actual,
            }
        }

        transition
    }

    /// The backend answered "busy". Does not change the state.
    pub fn on_busy(&self) {
        let now = self.now();
        self.last_busy_time.store(now, Ordering::Release);
        self.first_success_time.store(0, Ordering::Release);
        self.busy_count_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A physical connection was established: Fail recovers to Active.
    pub fn mark_connected(&self) -> (HealthState, HealthState) {
        self.connect_count_total.fetch_add(1, Ordering::Relaxed);
        self.state.apply(HealthEvent::Active)
    }

    /// An idle connection was reused instead of opening a new one.
    pub fn mark_reused(&self) {
        self.keepalive_count_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enable(&self) -> (HealthState, HealthState) {
        self.state.apply(HealthEvent::Enable)
    }

    pub fn disable(&self) -> (HealthState, HealthState) {
        self.state.apply(HealthEvent::Disable)
    }

    pub fn close(&self) -> (HealthState, HealthState) {
        self.state.apply(HealthEvent::Close)
    }

    pub fn dynamic_recover_timeout(&self) -> u64 {
        self.dynamic_recover_timeout.load(Ordering::Acquire)
    }

    pub fn recover_floor(&self) -> u64 {
        self.recover_floor_ms
    }

    pub fn first_fail_time(&self) -> u64 {
        self.first_fail_time.load(Ordering::Acquire)
    }

    pub fn last_fail_time(&self) -> u64 {
        self.last_fail_time.load(Ordering::Acquire)
    }

    pub fn first_success_time(&self) -> u64 {
        self.first_success_time.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Milliseconds left in the backoff window, or `None` if it has elapsed.
    pub fn backoff_remaining(&self, now: u64) -> Option<u64> {
        let last_fail = self.last_fail_time();
        if last_fail == 0 {
            return None;
        }

        let elapsed = now.saturating_sub(last_fail);
        let window = self.dynamic_recover_timeout();
        (elapsed < window).then(|| window - elapsed)
    }

    pub fn is_busy(&self, now: u64) -> bool {
        let last_busy = self.last_busy_time.load(Ordering::Acquire);
        last_busy > 0 && now < last_busy.saturating_add(self.policy.busy_recover_time_ms)
    }

    /// Concurrent connection cap while slow-starting after a failure.
    pub fn warmup_limit(&self, now: u64) -> Option<usize> {
        let first_success = self.first_success_time();
        if first_success == 0 || self.last_fail_time() == 0 {
            return None;
        }

        warmup_connection_limit(now.saturating_sub(first_success), self.policy.warmup_time_ms)
    }

    /// Whether a warming backend already holds as many connections as its
    /// slow-start slice allows.
    pub fn at_warmup_limit(&self, now: u64) -> bool {
        self.warmup_limit(now)
            .is_some_and(|limit| self.pending_count() >= limit)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state(),
            pending: self.pending_count(),
            dynamic_recover_timeout_ms: self.dynamic_recover_timeout(),
            first_fail_time: self.first_fail_time(),
            last_fail_time: self.last_fail_time(),
            first_success_time: self.first_success_time(),
            last_success_time: self.last_success_time.load(Ordering::Acquire),
            last_busy_time: self.last_busy_time.load(Ordering::Acquire),
            connect_count_total: self.connect_count_total.load(Ordering::Relaxed),
            keepalive_count_total: self.keepalive_count_total.load(Ordering::Relaxed),
            success_count_total: self.success_count_total.load(Ordering::Relaxed),
            fail_count_total: self.fail_count_total.load(Ordering::Relaxed),
            busy_count_total: self.busy_count_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a backend's health, for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub pending: usize,
    pub dynamic_recover_timeout_ms: u64,
    pub first_fail_time: u64,
    pub last_fail_time: u64,
    pub first_success_time: u64,
    pub last_success_time: u64,
    pub last_busy_time: u64,
    pub connect_count_total: u64,
    pub keepalive_count_total: u64,
    pub success_count_total: u64,
    pub fail_count_total: u64,
    pub busy_count_total: u64,
}
