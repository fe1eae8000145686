//! Request and response abstractions seen by the failover controller.
//!
//! The request is fully buffered so it can be replayed on a second
//! backend. The response is a sink that may be committed (made visible to
//! the client) part-way through; once committed it can no longer be reset.

use std::future::Future;

use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use hyper::body::Bytes;

/// A buffered inbound request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Origin-form target (path and query).
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: String,
}

impl ProxyRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            request_id: String::new(),
        }
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = id.into();
        self
    }

    /// Value of the named cookie, last occurrence winning.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let mut found = None;

        for value in self.headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else { continue };

            for pair in value.split(';') {
                if let Some((k, v)) = pair.trim().split_once('=') {
                    if k.trim() == name {
                        found = Some(v.trim().trim_matches('"').to_string());
                    }
                }
            }
        }

        found.filter(|v| !v.is_empty())
    }
}

/// Where the sticky key of a request comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickySource {
    pub cookie: Option<String>,
    pub header: Option<String>,
}

impl StickySource {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Cookie first, then header.
    pub fn resolve(&self, request: &ProxyRequest) -> Option<String> {
        if let Some(key) = self.cookie.as_deref().and_then(|name| request.cookie(name)) {
            return Some(key);
        }

        self.header
            .as_deref()
            .and_then(|name| request.headers.get(name))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// The client stopped listening.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("client disconnected")]
pub struct SinkClosed;

/// Destination for the upstream response.
pub trait ResponseSink: Send {
    /// Record status and headers. Replaces any earlier head until committed.
    fn set_head(&mut self, status: StatusCode, headers: HeaderMap);

    /// Append a body chunk. May commit the response.
    fn write_body(&mut self, chunk: Bytes) -> impl Future<Output = Result<(), SinkClosed>> + Send;

    /// Make everything written so far visible to the client.
    fn commit(&mut self) -> impl Future<Output = Result<(), SinkClosed>> + Send;

    /// Whether anything has reached the client.
    fn is_committed(&self) -> bool;

    /// Drop everything written so far. No effect once committed.
    fn reset(&mut self);
}

/// In-memory sink that commits once `commit_threshold` bytes are written.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    commit_threshold: Option<usize>,
    committed: bool,
    resets: usize,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit as soon as the body reaches `threshold` bytes.
    pub fn with_commit_threshold(threshold: usize) -> Self {
        Self {
            commit_threshold: Some(threshold),
            ..Self::default()
        }
    }

    /// Number of times the sink was reset.
    pub fn reset_count(&self) -> usize {
        self.resets
    }
}

impl ResponseSink for BufferedResponse {
    fn set_head(&mut self, status: StatusCode, headers: HeaderMap) {
        if !self.committed {
            self.status = Some(status);
            self.headers = headers;
        }
    }

    async fn write_body(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        self.body.extend_from_slice(&chunk);
        if self
            .commit_threshold
            .is_some_and(|threshold| self.body.len() >= threshold)
        {
            self.committed = true;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkClosed> {
        self.committed = true;
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.committed
    }

    fn reset(&mut self) {
        if self.committed {
            return;
        }
        self.status = None;
        self.headers.clear();
        self.body.clear();
        self.resets += 1;
    }
}
