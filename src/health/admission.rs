//! Connection admission control.
//!
//! # Responsibilities
//! - Decide whether a new connection attempt to a backend may start
//! - Let at most one probe through to a failed backend, and only after
//!   its backoff window has elapsed
//! - Release the slot when the attempt ends, however it ends
//!
//! Healthy backends are never throttled here: the fast path is a single
//! `fetch_add`.

use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::health::state::HealthState;
use crate::health::tracker::BackendHealth;
use crate::load_balancer::backend::Backend;

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    /// Disabled or closed by an operator.
    NotEnabled(HealthState),
    /// Still inside the backoff window after a failure.
    Backoff { remaining_ms: u64 },
    /// Another probe is already in flight.
    ProbeInFlight,
}

impl BackendHealth {
    /// Claim a connection slot. On success the pending count has been
    /// incremented and the caller owes one [`BackendHealth::complete_connection`].
    pub fn try_admit(&self) -> Result<(), AdmissionDenied> {
        let state = self.state();

        if state.is_active() {
            self.pending.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        if !state.is_enabled() {
            return Err(AdmissionDenied::NotEnabled(state));
        }

        if let Some(remaining_ms) = self.backoff_remaining(self.now()) {
            return Err(AdmissionDenied::Backoff { remaining_ms });
        }

        // single probe slot
        match self
            .pending
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(AdmissionDenied::ProbeInFlight),
        }
    }

    /// Release a slot claimed by [`BackendHealth::try_admit`].
    pub fn complete_connection(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Backend {
    /// Try to start a connection attempt to this backend.
    ///
    /// The returned permit releases its slot on drop.
    pub fn start_connection(self: &Arc<Self>) -> Option<ConnectionPermit> {
        match self.health.try_admit() {
            Ok(()) => Some(ConnectionPermit {
                backend: self.clone(),
            }),
            Err(AdmissionDenied::Backoff { remaining_ms }) => {
                tracing::trace!(backend = %self.id, remaining_ms, "Backend in backoff window");
                None
            }
            Err(reason) => {
                tracing::trace!(backend = %self.id, ?reason, "Connection not admitted");
                None
            }
        }
    }
}

/// A RAII guard for one admitted connection attempt.
#[derive(Debug)]
pub struct ConnectionPermit {
    backend: Arc<Backend>,
}

impl ConnectionPermit {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// The physical connection came up; a probing backend is live again.
    pub fn mark_connected(&self) {
        let (prev, next) = self.backend.health.mark_connected();
        if prev != next {
            tracing::info!(backend = %self.backend.id, from = %prev, to = %next, "Backend recovered");
        }
    }

    /// An idle connection was reused. Proves nothing about recovery.
    pub fn mark_reused(&self) {
        self.backend.health.mark_reused();
    }
}

impl Deref for ConnectionPermit {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.backend.health.complete_connection();
    }
}
