//! Recover-time growth and warm-up throttling.
//!
//! After a failure a backend is left alone for its dynamic recover timeout.
//! The timeout starts at one second and grows by one second per consecutive
//! failure up to the configured ceiling. A success resets it.

/// Initial recover timeout, and the value a success resets to.
pub const RECOVER_TIMEOUT_FLOOR_MS: u64 = 1_000;

/// Growth per consecutive failure.
pub const RECOVER_TIMEOUT_INCREMENT_MS: u64 = 1_000;

/// Number of slices the warm-up period is divided into.
pub const WARMUP_SLICES: u64 = 16;

/// Concurrent connection limit for each warm-up slice.
const WARMUP_CONNECTION_MAX: [usize; WARMUP_SLICES as usize] =
    [1, 1, 1, 1, 2, 2, 2, 2, 4, 4, 8, 8, 16, 32, 64, 128];

/// The recover timeout to use after one more failure.
///
/// Never decreases and never passes `ceiling` (unless `current` already
/// did, in which case it stays put).
pub fn next_recover_timeout(current: u64, ceiling: u64) -> u64 {
    current
        .saturating_add(RECOVER_TIMEOUT_INCREMENT_MS)
        .min(ceiling)
        .max(current)
}

/// Connection limit `elapsed` ms into a warm-up of `warmup_ms`.
///
/// `None` once the warm-up is over (or when warm-up is disabled).
pub fn warmup_connection_limit(elapsed: u64, warmup_ms: u64) -> Option<usize> {
    if warmup_ms == 0 {
        return None;
    }

    let slice = (warmup_ms / WARMUP_SLICES).max(1);
    let index = elapsed / slice;

    WARMUP_CONNECTION_MAX.get(index as usize).copied()
}
