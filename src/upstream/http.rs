//! HTTP/1.1 upstream connections.
//!
//! # Responsibilities
//! - Open TCP connections and run the hyper HTTP/1.1 handshake
//! - Keep released connections for reuse until they sit idle too long
//! - Forward one buffered request and stream the response into a sink
//! - Classify the result as ok, busy (503) or fail
//!
//! # Design Decisions
//! - One hyper connection driver task per TCP connection
//! - Idle connections are LIFO per backend and capped
//! - Every read from the backend runs under the socket timeout

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Version};
use dashmap::DashMap;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::load_balancer::backend::Backend;
use crate::proxy::exchange::{ProxyRequest, ResponseSink};
use crate::proxy::outcome::RequestOutcome;
use crate::resilience::timeouts::{with_deadline, TimeoutKind};
use crate::upstream::{ConnectionPool, OpenError, UpstreamConnection};

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove connection-scoped headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

fn wants_close(version: Version, headers: &HeaderMap) -> bool {
    let tokens = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();

    if version == Version::HTTP_10 {
        return !tokens.iter().any(|t| t == "keep-alive");
    }
    tokens.iter().any(|t| t == "close")
}

struct IdleConnection {
    sender: SendRequest<Full<Bytes>>,
    since: Instant,
}

/// Pool of hyper HTTP/1.1 client connections keyed by backend id.
pub struct HttpConnectionPool {
    idle: DashMap<String, Vec<IdleConnection>>,
    max_idle_per_backend: usize,
}

impl std::fmt::Debug for HttpConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnectionPool")
            .field("backends", &self.idle.len())
            .field("max_idle_per_backend", &self.max_idle_per_backend)
            .finish()
    }
}

impl HttpConnectionPool {
    pub fn new(max_idle_per_backend: usize) -> Self {
        Self {
            idle: DashMap::new(),
            max_idle_per_backend,
        }
    }

    /// Idle connections currently held for `backend_id`.
    pub fn idle_count(&self, backend_id: &str) -> usize {
        self.idle.get(backend_id).map(|v| v.len()).unwrap_or(0)
    }

    fn take_idle(&self, backend: &Backend) -> Option<SendRequest<Full<Bytes>>> {
        let mut entry = self.idle.get_mut(&backend.id)?;
        let idle_time = backend.settings.idle_time;

        while let Some(conn) = entry.pop() {
            if conn.since.elapsed() < idle_time && !conn.sender.is_closed() {
                return Some(conn.sender);
            }
        }
        None
    }

    async fn handshake(&self, backend: &Backend) -> Result<SendRequest<Full<Bytes>>, OpenError> {
        let limit = backend.settings.connect_timeout;

        let stream = with_deadline(TimeoutKind::Connect, limit, TcpStream::connect(&backend.address))
            .await
            .map_err(|e| OpenError::Fail(e.to_string()))?
            .map_err(|e| OpenError::Fail(format!("{}: {}", backend.address, e)))?;
        let _ = stream.set_nodelay(true);

        let (sender, conn) = with_deadline(
            TimeoutKind::Connect,
            limit,
            http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream)),
        )
        .await
        .map_err(|e| OpenError::Fail(e.to_string()))?
        .map_err(|e| OpenError::Fail(format!("handshake with {}: {}", backend.address, e)))?;

        let backend_id = backend.id.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(backend = %backend_id, error = %e, "Upstream connection closed with error");
            }
        });

        Ok(sender)
    }
}

impl Default for HttpConnectionPool {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ConnectionPool for HttpConnectionPool {
    type Connection = HttpConnection;

    async fn open(&self, backend: &Arc<Backend>) -> Result<HttpConnection, OpenError> {
        if let Some(sender) = self.take_idle(backend) {
            tracing::trace!(backend = %backend.id, "Reusing idle connection");
            return Ok(HttpConnection::new(backend.clone(), sender, true));
        }

        self.open_new(backend).await
    }

    async fn open_new(&self, backend: &Arc<Backend>) -> Result<HttpConnection, OpenError> {
        let sender = self.handshake(backend).await?;
        tracing::trace!(backend = %backend.id, address = %backend.address, "Opened upstream connection");

        Ok(HttpConnection::new(backend.clone(), sender, false))
    }

    fn release(&self, conn: HttpConnection) {
        if conn.sender.is_closed() || self.max_idle_per_backend == 0 {
            return;
        }

        let idle_time = conn.backend.settings.idle_time;
        let mut entry = self.idle.entry(conn.backend.id.clone()).or_default();
        entry.retain(|c| c.since.elapsed() < idle_time && !c.sender.is_closed());

        if entry.len() < self.max_idle_per_backend {
            entry.push(IdleConnection {
                sender: conn.sender,
                since: Instant::now(),
            });
        }
    }

    fn close(&self, conn: HttpConnection) {
        drop(conn);
    }

    fn purge(&self, backend: &Backend) {
        if let Some((_, dropped)) = self.idle.remove(&backend.id) {
            if !dropped.is_empty() {
                tracing::debug!(backend = %backend.id, count = dropped.len(), "Purged idle connections");
            }
        }
    }
}

/// A hyper HTTP/1.1 connection to one backend.
pub struct HttpConnection {
    backend: Arc<Backend>,
    sender: SendRequest<Full<Bytes>>,
    reused: bool,
    response_started: bool,
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("backend", &self.backend.id)
            .field("reused", &self.reused)
            .finish()
    }
}

impl HttpConnection {
    fn new(backend: Arc<Backend>, sender: SendRequest<Full<Bytes>>, reused: bool) -> Self {
        Self {
            backend,
            sender,
            reused,
            response_started: false,
        }
    }

    fn build_request(&self, request: &ProxyRequest) -> Result<Request<Full<Bytes>>, String> {
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);

        if !headers.contains_key(header::HOST) {
            let host = HeaderValue::from_str(&self.backend.address).map_err(|e| e.to_string())?;
            headers.insert(header::HOST, host);
        }
        if !request.request_id.is_empty() {
            if let Ok(id) = HeaderValue::from_str(&request.request_id) {
                headers.insert(HeaderName::from_static("x-request-id"), id);
            }
        }

        let path = request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        let mut builder = Request::builder().method(request.method.clone()).uri(path);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }

        builder
            .body(Full::new(request.body.clone()))
            .map_err(|e| e.to_string())
    }

    async fn forward<S: ResponseSink>(
        &mut self,
        request: &ProxyRequest,
        response: &mut S,
        socket_timeout: Duration,
    ) -> RequestOutcome {
        let req = match self.build_request(request) {
            Ok(req) => req,
            Err(e) => return RequestOutcome::fail(format!("invalid request: {}", e)),
        };

        match with_deadline(TimeoutKind::Socket, socket_timeout, self.sender.ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return RequestOutcome::fail(format!("connection not ready: {}", e)),
            Err(e) => return RequestOutcome::fail(e.to_string()),
        }

        let upstream = match with_deadline(TimeoutKind::Socket, socket_timeout, self.sender.send_request(req)).await {
            Ok(Ok(res)) => res,
            Ok(Err(e)) => return RequestOutcome::fail(e.to_string()),
            Err(e) => return RequestOutcome::fail(e.to_string()),
        };

        self.response_started = true;
        let (parts, mut body) = upstream.into_parts();

        if parts.status == StatusCode::SERVICE_UNAVAILABLE {
            return RequestOutcome::busy(format!("{} answered 503", self.backend.address));
        }

        let keep_alive = !wants_close(parts.version, &parts.headers);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        response.set_head(parts.status, headers);

        loop {
            let frame = match with_deadline(TimeoutKind::Socket, socket_timeout, body.frame()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(None) => break,
                Ok(Some(Err(e))) => return RequestOutcome::fail(format!("reading body: {}", e)),
                Err(e) => return RequestOutcome::fail(e.to_string()),
            };

            let Ok(data) = frame.into_data() else { continue };
            if response.write_body(data).await.is_err() {
                tracing::debug!(backend = %self.backend.id, "Client went away mid-response");
                return RequestOutcome::Ok { keep_alive: false };
            }
        }

        RequestOutcome::Ok { keep_alive }
    }
}

impl UpstreamConnection for HttpConnection {
    async fn send<S: ResponseSink>(&mut self, request: &ProxyRequest, response: &mut S) -> RequestOutcome {
        let socket_timeout = self.backend.settings.socket_timeout;
        self.forward(request, response, socket_timeout).await
    }

    fn is_reused(&self) -> bool {
        self.reused
    }

    fn response_started(&self) -> bool {
        self.response_started
    }
}
