//! Request handling and transformation.
//!
//! # Responsibilities
//! - Read or generate the request ID
//! - Turn an inbound axum request into a replayable `ProxyRequest`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing (tower-http layer)
//! - The body is buffered once, bounded by `max_body_size`, so a failed
//!   attempt can be replayed on another backend

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, Request, Uri},
};

use crate::proxy::exchange::ProxyRequest;

/// Header carrying the request correlation ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// The request ID from `headers`, or a fresh UUID v4.
pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// The body could not be buffered.
#[derive(Debug, thiserror::Error)]
#[error("failed to read request body: {0}")]
pub struct BodyError(#[from] axum::Error);

/// Buffer an inbound request for proxying.
pub async fn buffer_request(request: Request<Body>, max_body_size: usize) -> Result<ProxyRequest, BodyError> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, max_body_size).await?;

    let uri = parts
        .uri
        .path_and_query()
        .and_then(|pq| pq.as_str().parse::<Uri>().ok())
        .unwrap_or_else(|| Uri::from_static("/"));

    Ok(ProxyRequest {
        method: parts.method,
        uri,
        request_id: request_id(&parts.headers),
        headers: parts.headers,
        body,
    })
}
