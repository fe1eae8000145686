//! Admin API.
//!
//! # Routes
//! - `GET /admin/status`: version and backend summary
//! - `GET /admin/backends`: health snapshot of every backend
//! - `POST /admin/backends/{id}/{enable|disable|close}`: operator transitions
//!
//! Every route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::load_balancer::BackendSelector;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// State shared by admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub selector: Arc<BackendSelector>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/backends", get(get_backends))
        .route("/admin/backends/{id}/{action}", post(post_backend_action))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
