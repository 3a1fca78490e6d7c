//! Health and liveness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;

/// Returns health information as JSON.
///
/// `active_stores` counts request stores currently alive in the registry.
/// Outside of request handling it should settle back to zero; a number that
/// keeps growing means some code path writes locals without a scope that
/// clears them.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let active_stores = state.locals.registry().len();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "status": "ok",
        "active_stores": active_stores,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}
