//! Mock backend for trying failover by hand.
//!
//! ```text
//! cargo run --example mock_backend -- 9001 app-a
//! cargo run --example mock_backend -- 9002 app-b --busy
//! ```
//!
//! `--busy` answers every request with 503, which the proxy treats as an
//! overload signal rather than a failure.

use std::net::SocketAddr;

use axum::{http::StatusCode, routing::any, Router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port: u16 = args.next().as_deref().unwrap_or("9001").parse()?;
    let name = args.next().unwrap_or_else(|| format!("backend-{}", port));
    let busy = args.any(|a| a == "--busy");

    let reply = move || {
        let name = name.clone();
        async move {
            if busy {
                (StatusCode::SERVICE_UNAVAILABLE, format!("{} is busy\n", name))
            } else {
                (StatusCode::OK, format!("hello from {}\n", name))
            }
        }
    };

    let app = Router::new()
        .route("/", any(reply.clone()))
        .route("/{*path}", any(reply));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!("mock backend listening on http://{} (busy: {})", addr, busy);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
