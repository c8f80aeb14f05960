//! History API: session list, session detail, filter options.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

use tarsy_history::SessionFilter;

use crate::state::AppState;

fn history_disabled() -> axum::response::Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "history is disabled" })),
    )
        .into_response()
}

/// GET /api/v1/history/sessions — filtered, paginated session list.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return history_disabled();
    };
    match history.list_sessions(&filter) {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session list query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "query failed" }))).into_response()
        }
    }
}

/// GET /api/v1/history/sessions/{session_id} — the full session timeline.
pub async fn session_detail(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return history_disabled();
    };
    match history.get_session_timeline(&session_id) {
        Ok(Some(detail)) => Json(detail).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "session not found" }))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, session_id, "timeline query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "query failed" }))).into_response()
        }
    }
}

/// GET /api/v1/history/active-sessions — sessions still pending/in-progress.
pub async fn active_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return history_disabled();
    };
    match history.active_sessions() {
        Ok(sessions) => Json(json!({ "sessions": sessions })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "active sessions query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "query failed" }))).into_response()
        }
    }
}

/// GET /api/v1/history/filter-options — distinct filter values.
pub async fn filter_options(State(state): State<AppState>) -> impl IntoResponse {
    let Some(history) = &state.history else {
        return history_disabled();
    };
    match history.get_filter_options() {
        Ok(options) => Json(options).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "filter options query failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "query failed" }))).into_response()
        }
    }
}
