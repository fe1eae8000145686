//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, proxy handler)
//!     → request.rs (request ID, buffer body into a ProxyRequest)
//!     → proxy controller (select backend, proxy, maybe fail over)
//!     → response.rs (hold back until commit, then stream to client)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{buffer_request, request_id, X_REQUEST_ID};
pub use response::{error_response, StreamingResponse};
pub use server::HttpServer;
