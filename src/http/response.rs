//! Response handling and transformation.
//!
//! # Responsibilities
//! - Hold back the backend response until it is safe to commit
//! - Stream the body to the client once committed
//! - Map proxy errors to HTTP status codes
//!
//! # Design Decisions
//! - The head and the first `commit_threshold` body bytes stay buffered,
//!   so a failure before that point can still fail over
//! - Body chunks flow through a bounded channel (backpressure to the backend)
//! - A failure after commit aborts the body stream instead of appending

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use hyper::body::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::proxy::exchange::{ResponseSink, SinkClosed};
use crate::proxy::outcome::ProxyError;

const BODY_CHANNEL_CAPACITY: usize = 16;

type BodyItem = Result<Bytes, std::io::Error>;

/// Error response for a request that could not be proxied.
pub fn error_response(err: &ProxyError) -> Response {
    let message = match err {
        ProxyError::NoBackendAvailable => "No backend available",
        ProxyError::Busy { .. } => "Backend busy",
        ProxyError::TransportFailure { .. } | ProxyError::NonIdempotentFailure { .. } => {
            "Upstream request failed"
        }
    };
    (err.status(), message).into_response()
}

/// A [`ResponseSink`] that feeds an axum response.
pub struct StreamingResponse {
    head: Option<(StatusCode, HeaderMap)>,
    pending: Vec<Bytes>,
    pending_len: usize,
    commit_threshold: usize,
    head_tx: Option<oneshot::Sender<Response>>,
    body_tx: Option<mpsc::Sender<BodyItem>>,
    status: Option<StatusCode>,
}

impl StreamingResponse {
    /// Create a sink and the receiver of the response it will produce.
    pub fn channel(commit_threshold: usize) -> (Self, oneshot::Receiver<Response>) {
        let (head_tx, head_rx) = oneshot::channel();
        let sink = Self {
            head: None,
            pending: Vec::new(),
            pending_len: 0,
            commit_threshold,
            head_tx: Some(head_tx),
            body_tx: None,
            status: None,
        };
        (sink, head_rx)
    }

    /// Status sent to the client, once committed.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Commit whatever is buffered and end the body. Returns the status
    /// the client received.
    pub async fn finish(mut self) -> Result<StatusCode, SinkClosed> {
        self.commit().await?;
        self.body_tx.take();
        Ok(self.status.unwrap_or(StatusCode::OK))
    }

    /// Report a failed request.
    ///
    /// Sends an error response if nothing was committed; otherwise aborts
    /// the body so the client sees a truncated response.
    pub async fn fail(mut self, err: &ProxyError) {
        if let Some(head_tx) = self.head_tx.take() {
            self.status = Some(err.status());
            let _ = head_tx.send(error_response(err));
            return;
        }

        if let Some(body_tx) = self.body_tx.take() {
            let abort = std::io::Error::new(std::io::ErrorKind::ConnectionAborted, err.to_string());
            let _ = body_tx.send(Err(abort)).await;
        }
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        match &self.body_tx {
            Some(tx) => tx.send(Ok(chunk)).await.map_err(|_| SinkClosed),
            None => Err(SinkClosed),
        }
    }
}

impl ResponseSink for StreamingResponse {
    fn set_head(&mut self, status: StatusCode, headers: HeaderMap) {
        if !self.is_committed() {
            self.head = Some((status, headers));
        }
    }

    async fn write_body(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.is_committed() {
            return self.send_chunk(chunk).await;
        }

        self.pending_len += chunk.len();
        self.pending.push(chunk);

        if self.pending_len >= self.commit_threshold {
            self.commit().await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SinkClosed> {
        let Some(head_tx) = self.head_tx.take() else {
            return Ok(());
        };

        let (status, headers) = self
            .head
            .take()
            .unwrap_or((StatusCode::OK, HeaderMap::new()));

        let (body_tx, mut body_rx) = mpsc::channel::<BodyItem>(BODY_CHANNEL_CAPACITY);
        let stream = futures_util::stream::poll_fn(move |cx| body_rx.poll_recv(cx));

        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = headers;

        self.status = Some(status);
        self.body_tx = Some(body_tx);
        head_tx.send(response).map_err(|_| SinkClosed)?;

        for chunk in std::mem::take(&mut self.pending) {
            self.send_chunk(chunk).await?;
        }
        self.pending_len = 0;
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.head_tx.is_none()
    }

    fn reset(&mut self) {
        if self.is_committed() {
            return;
        }
        self.head = None;
        self.pending.clear();
        self.pending_len = 0;
    }
}
