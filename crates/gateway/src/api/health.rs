//! Liveness and health probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use crate::state::AppState;

/// GET / — liveness.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "tarsy" }))
}

/// GET /health — overall service health.
///
/// `unhealthy` when the engine cannot run at all (no LLM provider);
/// `degraded` when history is enabled but the database is unreachable.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let history_enabled = state.config.history.enabled;
    let database_ok = match &state.history {
        Some(history) => history.health_check(),
        None => true,
    };
    let llm_ok = state.alerts.llm_available();

    let status = if !llm_ok {
        "unhealthy"
    } else if history_enabled && !database_ok {
        "degraded"
    } else {
        "healthy"
    };
    let code = if status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        code,
        Json(json!({
            "status": status,
            "history_enabled": history_enabled,
            "database_connected": database_ok,
            "llm_available": llm_ok,
            "dashboard_connections": state.broadcaster.connection_count(),
        })),
    )
}
