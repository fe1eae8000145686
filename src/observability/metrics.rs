//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (requests, latency, attempts, failovers)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend health and recover timeout
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, backend
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_attempts_total` (counter): backend attempts by outcome
//! - `proxy_attempt_duration_seconds` (histogram): time spent per attempt
//! - `proxy_failovers_total` (counter): requests replayed on another backend
//! - `proxy_backend_state` (gauge): 1=active, 0=otherwise
//! - `proxy_backend_recover_timeout_ms` (gauge): current backoff window
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed (tests, CLI)
//! - Labels for backend, method, status code, outcome

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::state::HealthState;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// One finished client request.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);
    ::metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// One attempt against one backend.
pub fn record_attempt(backend: &str, outcome: &'static str, elapsed: Duration) {
    ::metrics::counter!(
        "proxy_attempts_total",
        "backend" => backend.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("proxy_attempt_duration_seconds", "backend" => backend.to_string())
        .record(elapsed.as_secs_f64());
}

/// A request was replayed on another backend.
pub fn record_failover(from: &str, to: &str) {
    ::metrics::counter!(
        "proxy_failovers_total",
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// Current health of a backend.
pub fn record_backend_health(backend: &str, state: HealthState, recover_timeout_ms: u64) {
    let active = if state.is_active() { 1.0 } else { 0.0 };
    ::metrics::gauge!("proxy_backend_state", "backend" => backend.to_string()).set(active);
    ::metrics::gauge!("proxy_backend_recover_timeout_ms", "backend" => backend.to_string())
        .set(recover_timeout_ms as f64);
}
