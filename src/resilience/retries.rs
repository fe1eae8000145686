//! Failover eligibility.
//!
//! # Responsibilities
//! - Decide whether a failed request may be retried on another backend
//! - Hold the set of methods considered safe to replay
//!
//! A request is replayed at most once, only after a transport failure,
//! only if nothing was committed to the client, and only for a method in
//! the policy (GET by default).

use std::fmt;

use axum::http::Method;

use crate::config::FailoverConfig;

/// Why a failed request was not retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryBlock {
    /// Failover is switched off.
    Disabled,
    /// The method is not in the replayable set.
    Method(Method),
    /// Part of the response already reached the client.
    Committed,
}

impl fmt::Display for RetryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryBlock::Disabled => f.write_str("failover disabled"),
            RetryBlock::Method(m) => write!(f, "method {} is not replayable", m),
            RetryBlock::Committed => f.write_str("response already committed"),
        }
    }
}

/// Which requests may fail over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverPolicy {
    enabled: bool,
    methods: Vec<Method>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            methods: vec![Method::GET],
        }
    }
}

impl FailoverPolicy {
    pub fn new(enabled: bool, methods: Vec<Method>) -> Self {
        Self { enabled, methods }
    }

    /// Build from config. Unparseable names are rejected by validation
    /// beforehand, so they are skipped here.
    pub fn from_config(config: &FailoverConfig) -> Self {
        let methods = config
            .methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();

        Self::new(config.enabled, methods)
    }

    pub fn is_replayable(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    /// `Ok(())` if a transport failure may be retried on another backend.
    pub fn check(&self, method: &Method, committed: bool) -> Result<(), RetryBlock> {
        if !self.enabled {
            return Err(RetryBlock::Disabled);
        }
        if committed {
            return Err(RetryBlock::Committed);
        }
        if !self.is_replayable(method) {
            return Err(RetryBlock::Method(method.clone()));
        }
        Ok(())
    }
}
