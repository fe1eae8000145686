//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check backend identity (ids present and unique, addresses parseable)
//! - Validate value ranges (timeouts > 0, weights > 0, recover ceiling)
//! - Check the failover method list and the admin key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::{SocketAddr, ToSocketAddrs};

use axum::http::Method;

use crate::config::schema::{BackendConfig, ProxyConfig};
use crate::resilience::backoff::RECOVER_TIMEOUT_FLOOR_MS;

/// One rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be positive"));
    }

    let lb = &config.load_balance;
    check_timings(
        "load_balance",
        Some(lb.connect_timeout_ms),
        Some(lb.socket_timeout_ms),
        Some(lb.recover_time_ms),
        Some(lb.weight),
        &mut errors,
    );
    if lb.sticky_sessions && lb.session_cookie.is_empty() && lb.sticky_header.is_none() {
        errors.push(ValidationError::new(
            "load_balance.sticky_sessions",
            "enabled without a session_cookie or sticky_header",
        ));
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::new("backends", "at least one backend is required"));
    }

    let mut seen = HashSet::new();
    for (i, backend) in config.backends.iter().enumerate() {
        check_backend(i, backend, &mut seen, &mut errors);
    }

    if config.failover.methods.is_empty() {
        errors.push(ValidationError::new("failover.methods", "must not be empty"));
    }
    for name in &config.failover.methods {
        if Method::from_bytes(name.to_ascii_uppercase().as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "failover.methods",
                format!("'{}' is not an HTTP method", name),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "admin.bind_address",
                format!("'{}' is not a socket address", config.admin.bind_address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_backend(
    index: usize,
    backend: &BackendConfig,
    seen: &mut HashSet<String>,
    errors: &mut Vec<ValidationError>,
) {
    let prefix = format!("backends[{}]", index);

    if backend.id.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.id", prefix), "must not be empty"));
    } else if !seen.insert(backend.id.clone()) {
        errors.push(ValidationError::new(
            format!("{}.id", prefix),
            format!("duplicate backend id '{}'", backend.id),
        ));
    }

    // host:port with a numeric port; name resolution happens at connect time
    let parseable = backend.address.parse::<SocketAddr>().is_ok()
        || backend
            .address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
    if !parseable {
        errors.push(ValidationError::new(
            format!("{}.address", prefix),
            format!("'{}' is not a host:port address", backend.address),
        ));
    }

    check_timings(
        &prefix,
        backend.connect_timeout_ms,
        backend.socket_timeout_ms,
        backend.recover_time_ms,
        backend.weight,
        errors,
    );
}

fn check_timings(
    prefix: &str,
    connect_timeout_ms: Option<u64>,
    socket_timeout_ms: Option<u64>,
    recover_time_ms: Option<u64>,
    weight: Option<u32>,
    errors: &mut Vec<ValidationError>,
) {
    if connect_timeout_ms == Some(0) {
        errors.push(ValidationError::new(format!("{}.connect_timeout_ms", prefix), "must be positive"));
    }
    if socket_timeout_ms == Some(0) {
        errors.push(ValidationError::new(format!("{}.socket_timeout_ms", prefix), "must be positive"));
    }
    if recover_time_ms.is_some_and(|ms| ms < RECOVER_TIMEOUT_FLOOR_MS) {
        errors.push(ValidationError::new(
            format!("{}.recover_time_ms", prefix),
            format!("must be at least {}", RECOVER_TIMEOUT_FLOOR_MS),
        ));
    }
    if weight == Some(0) {
        errors.push(ValidationError::new(format!("{}.weight", prefix), "must be positive"));
    }
}

/// Resolve `address` once, for early diagnostics.
pub fn resolves(address: &str) -> bool {
    address.to_socket_addrs().map(|mut a| a.next().is_some()).unwrap_or(false)
}
