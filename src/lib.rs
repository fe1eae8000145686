//! Failover reverse proxy library.
//!
//! Passive backend health tracking, admission control during outages and
//! single-hop request failover, behind an axum HTTP surface.

pub mod admin;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod upstream;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
