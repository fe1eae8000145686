//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Build backends, connection pool and failover controller from config
//! - Bind server to listener, run the admin API next to it
//! - Close every backend on shutdown

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ProxyConfig;
use crate::http::request::buffer_request;
use crate::http::response::StreamingResponse;
use crate::load_balancer::BackendSelector;
use crate::observability::metrics;
use crate::proxy::FailoverProxyController;
use crate::resilience::retries::FailoverPolicy;
use crate::upstream::HttpConnectionPool;

type Controller = FailoverProxyController<HttpConnectionPool>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub max_body_size: usize,
    pub commit_threshold: usize,
}

/// HTTP server for the failover proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    selector: Arc<BackendSelector>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Self {
        let selector = Arc::new(BackendSelector::from_config(&config));
        let pool = Arc::new(HttpConnectionPool::new(config.load_balance.max_idle_per_backend));
        let controller = Arc::new(FailoverProxyController::new(
            selector.clone(),
            pool,
            FailoverPolicy::from_config(&config.failover),
            config.load_balance.sticky_source(),
        ));

        let state = AppState {
            controller,
            max_body_size: config.listener.max_body_size,
            commit_threshold: config.listener.commit_threshold_bytes,
        };

        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            selector,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            // the timeout needs a `Default` body, so it sits directly on the router
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.listener.request_timeout_secs)));

        Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state)
            .layer(middleware)
    }

    /// Router for the admin API over this server's backends.
    pub fn admin_router(&self) -> Router {
        setup_admin_router(AdminState {
            selector: self.selector.clone(),
            api_key: Arc::from(self.config.admin.api_key.as_str()),
        })
    }

    pub fn selector(&self) -> &Arc<BackendSelector> {
        &self.selector
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            backends = self.selector.backends().len(),
            strategy = ?self.selector.strategy(),
            "HTTP server starting"
        );

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %self.config.admin.bind_address, "Admin API listening");

            let admin = self.admin_router();
            let mut admin_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped");
                }
            });
        }

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        self.selector.close_all();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Main proxy handler.
///
/// Buffers the request, then hands it to a task that runs the failover
/// controller and streams the chosen backend's answer back.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    let request = match buffer_request(request, state.max_body_size).await {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected request body");
            metrics::record_request(&method, 413, "none", start);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    tracing::debug!(
        request_id = %request.request_id,
        method = %request.method,
        uri = %request.uri,
        "Proxying request"
    );

    let (mut sink, head) = StreamingResponse::channel(state.commit_threshold);
    let controller = state.controller.clone();

    tokio::spawn(async move {
        match controller.proxy(&request, &mut sink).await {
            Ok(report) => {
                let status = match sink.finish().await {
                    Ok(status) => status.as_u16(),
                    Err(_) => {
                        tracing::debug!(request_id = %request.request_id, "Client disconnected");
                        499
                    }
                };
                metrics::record_request(&method, status, &report.backend, start);
            }
            Err(err) => {
                tracing::warn!(
                    request_id = %request.request_id,
                    error = %err,
                    kind = err.label(),
                    "Request failed"
                );
                metrics::record_request(
                    &method,
                    err.status().as_u16(),
                    err.backend().unwrap_or("none"),
                    start,
                );
                sink.fail(&err).await;
            }
        }
    });

    match head.await {
        Ok(response) => response,
        Err(_) => (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response(),
    }
}
