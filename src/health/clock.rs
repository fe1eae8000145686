//! Millisecond time source for health bookkeeping.
//!
//! Health timestamps are plain `u64` milliseconds so they fit in atomics.
//! A value of 0 always means "unset", so clocks never report 0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic millisecond clock.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds. Never returns 0.
    fn now_millis(&self) -> u64;
}

/// Wall-clock based on [`Instant`], anchored when the clock is created.
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }

    /// Shared handle, the form backends hold.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64 + 1
    }
}

/// A clock that only moves when told to.
///
/// Used to drive backoff and warm-up windows deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Start the clock at `start` milliseconds (clamped to at least 1).
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start.max(1)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis.max(1), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_reports_zero() {
        let clock = MonotonicClock::new();
        assert!(clock.now_millis() >= 1);
    }

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new(0);
        assert_eq!(clock.now_millis(), 1);
        clock.advance(500);
        assert_eq!(clock.now_millis(), 501);
        clock.set(10_000);
        assert_eq!(clock.now_millis(), 10_000);
    }
}
