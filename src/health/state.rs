//! Backend health state machine.
//!
//! # States
//! - Active: backend receives traffic
//! - Fail: a failure was observed; only backoff-gated probes get through
//! - Disabled: administratively out of rotation
//! - Enabled: transient signal state, resolved to Active on the spot
//! - Closed: terminal
//!
//! # State Transitions
//! ```text
//!             fail                  disable
//!   Active ────────▶ Fail    Active ───────▶ Disabled
//!     ▲               │                        │
//!     └───── active ──┘        Disabled ── enable ──▶ Enabled ──▶ Active
//!
//!   any ── close ──▶ Closed (absorbing)
//! ```
//!
//! The next state is `transition(current, event)`: the event is resolved
//! against the current state, so Disabled swallows fail/active events
//! while still yielding to close.

use std::sync::atomic::{AtomicU8, Ordering};

/// Health state of a backend.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Active = 0,
    Fail = 1,
    Disabled = 2,
    Enabled = 3,
    Closed = 4,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            0 => HealthState::Active,
            1 => HealthState::Fail,
            2 => HealthState::Disabled,
            3 => HealthState::Enabled,
            _ => HealthState::Closed,
        }
    }
}

impl HealthState {
    pub const ALL: [HealthState; 5] = [
        HealthState::Active,
        HealthState::Fail,
        HealthState::Disabled,
        HealthState::Enabled,
        HealthState::Closed,
    ];

    /// Connections are unrestricted.
    pub fn is_active(self) -> bool {
        matches!(self, HealthState::Active | HealthState::Enabled)
    }

    /// Administratively in rotation (Fail counts: it is only unhealthy).
    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            HealthState::Active | HealthState::Fail | HealthState::Enabled
        )
    }

    pub fn is_closed(self) -> bool {
        self == HealthState::Closed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Active => "ACTIVE",
            HealthState::Fail => "FAIL",
            HealthState::Disabled => "DISABLED",
            HealthState::Enabled => "ENABLED",
            HealthState::Closed => "CLOSED",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    /// A connection to the backend was established.
    Active,
    /// A request or connection attempt failed.
    Fail,
    Enable,
    Disable,
    Close,
}

impl HealthEvent {
    pub const ALL: [HealthEvent; 5] = [
        HealthEvent::Active,
        HealthEvent::Fail,
        HealthEvent::Enable,
        HealthEvent::Disable,
        HealthEvent::Close,
    ];
}

/// The transition table: `table[state][event] -> next state`.
pub fn transition(state: HealthState, event: HealthEvent) -> HealthState {
    use HealthEvent as E;
    use HealthState as S;

    match (state, event) {
        (S::Closed, _) => S::Closed,
        (_, E::Close) => S::Closed,

        (S::Disabled, E::Enable) => S::Enabled,
        (S::Disabled, _) => S::Disabled,

        (_, E::Disable) => S::Disabled,

        (S::Active, E::Active | E::Enable) => S::Active,
        (S::Active, E::Fail) => S::Fail,

        (S::Fail, E::Active) => S::Active,
        (S::Fail, E::Fail | E::Enable) => S::Fail,

        (S::Enabled, E::Active) => S::Active,
        (S::Enabled, E::Fail) => S::Fail,
        (S::Enabled, E::Enable) => S::Enabled,
    }
}

/// Like [`transition`], but never rests in `Enabled`: the signal state is
/// fed straight back through the table as an `Active` event.
pub fn resolve(state: HealthState, event: HealthEvent) -> HealthState {
    match transition(state, event) {
        HealthState::Enabled => transition(HealthState::Enabled, HealthEvent::Active),
        next => next,
    }
}

/// Lock-free cell holding a [`HealthState`].
#[derive(Debug)]
pub struct AtomicHealthState {
    inner: AtomicU8,
}

impl AtomicHealthState {
    pub fn new(state: HealthState) -> Self {
        Self {
            inner: AtomicU8::new(state as u8),
        }
    }

    pub fn load(&self) -> HealthState {
        HealthState::from(self.inner.load(Ordering::Acquire))
    }

    /// Apply `event` atomically. Returns `(previous, next)`.
    pub fn apply(&self, event: HealthEvent) -> (HealthState, HealthState) {
        let mut prev = self.inner.load(Ordering::Acquire);
        loop {
            let next = resolve(HealthState::from(prev), event);
            if next as u8 == prev {
                return (next, next);
            }
            match self.inner.compare_exchange_weak(
                prev,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (HealthState::from(prev), next),
                Err(actual) => prev = actual,
            }
        }
    }
}
