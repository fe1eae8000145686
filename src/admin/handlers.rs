use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::health::state::HealthState;
use crate::health::tracker::HealthSnapshot;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub strategy: crate::load_balancer::Strategy,
    pub backends_total: usize,
    pub backends_active: usize,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub id: String,
    pub address: String,
    pub weight: u32,
    #[serde(flatten)]
    pub health: HealthSnapshot,
}

#[derive(Debug, Serialize)]
pub struct ActionResult {
    pub id: String,
    pub action: String,
    pub state: HealthState,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let backends = state.selector.backends();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        strategy: state.selector.strategy(),
        backends_total: backends.len(),
        backends_active: backends.iter().filter(|b| b.is_active()).count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendStatus>> {
    let statuses = state
        .selector
        .backends()
        .iter()
        .map(|b| BackendStatus {
            id: b.id.clone(),
            address: b.address.clone(),
            weight: b.settings.weight,
            health: b.snapshot(),
        })
        .collect();

    Json(statuses)
}

pub async fn post_backend_action(
    State(state): State<AdminState>,
    Path((id, action)): Path<(String, String)>,
) -> Result<Json<ActionResult>, (StatusCode, String)> {
    let backend = state
        .selector
        .backend(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown backend '{}'", id)))?;

    let next = match action.as_str() {
        "enable" => backend.enable(),
        "disable" => backend.disable(),
        "close" => backend.close(),
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("unknown action '{}'; expected enable, disable or close", other),
            ))
        }
    };

    Ok(Json(ActionResult {
        id,
        action,
        state: next,
    }))
}
