//! Sticky key hashing.
//!
//! A sticky key (typically a session id) maps to a fixed position in the
//! configured backend order, so repeat requests land on the same backend
//! while it stays usable. The hash is FNV-1a: stable across processes and
//! restarts.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(key: &str) -> u64 {
    key.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(FNV_PRIME))
}

/// Index of the backend `key` is pinned to. `len` must be non-zero.
pub fn sticky_index(key: &str, len: usize) -> usize {
    (fnv1a(key) % len as u64) as usize
}
