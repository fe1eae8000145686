//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::health::tracker::HealthPolicy;
use crate::load_balancer::backend::BackendSettings;
use crate::load_balancer::Strategy;
use crate::proxy::exchange::StickySource;

/// Root configuration for the failover proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, limits).
    pub listener: ListenerConfig,

    /// Backend selection and health tuning shared by all backends.
    pub load_balance: LoadBalanceConfig,

    /// Which failed requests may be replayed on another backend.
    pub failover: FailoverConfig,

    /// Backend server definitions, in selection order.
    pub backends: Vec<BackendConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body buffered for replay, in bytes.
    pub max_body_size: usize,

    /// Whole-request deadline enforced at the HTTP layer.
    pub request_timeout_secs: u64,

    /// Response bytes held back before the response is committed to the
    /// client. Until then a failed attempt can still fail over.
    pub commit_threshold_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_size: 1024 * 1024,
            request_timeout_secs: 60,
            commit_threshold_bytes: 64 * 1024,
        }
    }
}

/// Global load balancing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalanceConfig {
    /// Selection strategy (adaptive, least-connection, round-robin).
    pub strategy: Strategy,

    /// Pin requests carrying a session key to one backend.
    pub sticky_sessions: bool,

    /// Cookie holding the session key.
    pub session_cookie: String,

    /// Header consulted when the cookie is absent.
    pub sticky_header: Option<String>,

    pub connect_timeout_ms: u64,
    pub socket_timeout_ms: u64,
    pub idle_time_ms: u64,

    /// Ceiling of the dynamic recover timeout.
    pub recover_time_ms: u64,

    /// How long a busy answer deprioritizes a backend.
    pub busy_recover_time_ms: u64,

    /// Slow-start window after a backend recovers.
    pub warmup_time_ms: u64,

    pub weight: u32,

    /// Idle connections kept per backend.
    pub max_idle_per_backend: usize,
}

impl Default for LoadBalanceConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Adaptive,
            sticky_sessions: true,
            session_cookie: "SESSIONID".to_string(),
            sticky_header: None,
            connect_timeout_ms: 5_000,
            socket_timeout_ms: 30_000,
            idle_time_ms: 10_000,
            recover_time_ms: 15_000,
            busy_recover_time_ms: 15_000,
            warmup_time_ms: 60_000,
            weight: 100,
            max_idle_per_backend: 16,
        }
    }
}

impl LoadBalanceConfig {
    /// Resolve a backend's settings, applying its overrides.
    pub fn settings_for(&self, backend: &BackendConfig) -> BackendSettings {
        BackendSettings {
            connect_timeout: Duration::from_millis(
                backend.connect_timeout_ms.unwrap_or(self.connect_timeout_ms),
            ),
            socket_timeout: Duration::from_millis(
                backend.socket_timeout_ms.unwrap_or(self.socket_timeout_ms),
            ),
            idle_time: Duration::from_millis(backend.idle_time_ms.unwrap_or(self.idle_time_ms)),
            weight: backend.weight.unwrap_or(self.weight),
            health: HealthPolicy {
                recover_time_ms: backend.recover_time_ms.unwrap_or(self.recover_time_ms),
                busy_recover_time_ms: backend
                    .busy_recover_time_ms
                    .unwrap_or(self.busy_recover_time_ms),
                warmup_time_ms: backend.warmup_time_ms.unwrap_or(self.warmup_time_ms),
            },
        }
    }

    /// Where sticky keys are read from.
    pub fn sticky_source(&self) -> StickySource {
        if !self.sticky_sessions {
            return StickySource::disabled();
        }

        StickySource {
            cookie: Some(self.session_cookie.clone()).filter(|c| !c.is_empty()),
            header: self.sticky_header.clone(),
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub id: String,

    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recover_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub busy_recover_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
}

impl BackendConfig {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            ..Self::default()
        }
    }
}

/// Failover configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Retry transport failures on another backend.
    pub enabled: bool,

    /// Methods that may be replayed.
    pub methods: Vec<String>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            methods: vec!["GET".to_string()],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
