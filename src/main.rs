//! Failover reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────┐
//!                      │                  FAILOVER PROXY                  │
//!                      │                                                  │
//!   Client Request     │  ┌─────────┐   ┌────────────┐   ┌─────────────┐  │
//!   ───────────────────┼─▶│  http   │──▶│   proxy    │──▶│load_balancer│  │
//!                      │  │ server  │   │ controller │   │  selector   │  │
//!                      │  └─────────┘   └─────┬──────┘   └──────┬──────┘  │
//!                      │                      │                 │         │
//!                      │                      ▼                 ▼         │
//!   Client Response    │  ┌─────────┐   ┌────────────┐   ┌─────────────┐  │
//!   ◀──────────────────┼──│response │◀──│  upstream  │   │   health    │  │
//!                      │  │ stream  │   │    pool    │   │ admission + │  │
//!                      │  └─────────┘   └─────┬──────┘   │   tracker   │  │
//!                      │                      │          └─────────────┘  │
//!                      └──────────────────────┼───────────────────────────┘
//!                                             ▼
//!                                       Backend servers
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use failover_proxy::config::{load_config, validation::resolves, ProxyConfig};
use failover_proxy::lifecycle::{signals, Shutdown};
use failover_proxy::observability::{logging, metrics};
use failover_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "failover-proxy")]
#[command(about = "HTTP reverse proxy with backend health tracking and failover", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config: ProxyConfig = load_config(&args.config)?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "failover-proxy starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backends = config.backends.len(),
        strategy = ?config.load_balance.strategy,
        failover = config.failover.enabled,
        "Configuration loaded"
    );

    for backend in &config.backends {
        if !resolves(&backend.address) {
            tracing::warn!(backend = %backend.id, address = %backend.address, "Backend address does not resolve yet");
        }
    }

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    let server = HttpServer::new(config);
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
