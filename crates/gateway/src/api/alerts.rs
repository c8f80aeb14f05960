//! Alert submission and status endpoints.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use tarsy_domain::alert::Alert;

use crate::sanitize::sanitize_value;
use crate::state::AppState;

/// Hard cap on the submission payload. A payload of exactly this size is
/// accepted; one byte more is rejected with 413.
pub const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct AlertSubmission {
    alert_type: String,
    runbook: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

fn error_body(message: &str) -> Json<Value> {
    Json(json!({ "error": message }))
}

/// POST /alerts — validate, sanitize, and enqueue an alert.
pub async fn submit_alert(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("Empty request body")).into_response();
    }
    if body.len() > MAX_PAYLOAD_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            error_body("Alert payload exceeds the 10 MB limit"),
        )
            .into_response();
    }

    let raw: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, error_body(&format!("Invalid JSON: {e}"))).into_response();
        }
    };
    if !raw.is_object() {
        return (StatusCode::BAD_REQUEST, error_body("Request body must be a JSON object")).into_response();
    }

    let submission: AlertSubmission = match serde_json::from_value(raw) {
        Ok(submission) => submission,
        Err(e) => {
            // Field-level validation failure.
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "validation failed", "detail": e.to_string() })),
            )
                .into_response();
        }
    };
    if submission.alert_type.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("alert_type must not be empty")).into_response();
    }
    if submission.runbook.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, error_body("runbook must not be empty")).into_response();
    }

    // Merge the top-level submission fields into the opaque alert data,
    // then sanitize the whole payload.
    let mut alert_data = if submission.data.is_object() {
        submission.data
    } else {
        json!({})
    };
    alert_data["runbook"] = json!(submission.runbook);
    if let Some(severity) = submission.severity {
        alert_data["severity"] = json!(severity);
    }
    if let Some(timestamp) = submission.timestamp {
        alert_data["timestamp"] = json!(timestamp);
    }
    sanitize_value(&mut alert_data);

    let alert = Alert::new(submission.alert_type, alert_data);
    match state.alerts.clone().submit_alert(alert).await {
        Ok(outcome) => {
            let status = if outcome.duplicate { "duplicate" } else { "queued" };
            let message = if outcome.duplicate {
                "Identical alert is already being processed"
            } else {
                "Alert accepted for processing"
            };
            (
                StatusCode::OK,
                Json(json!({
                    "alert_id": outcome.alert_id,
                    "status": status,
                    "message": message,
                })),
            )
                .into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, error_body(&e.to_string())).into_response(),
    }
}

/// GET /session-id/{alert_id} — map an issued alert id to its session.
pub async fn session_id_for_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> impl IntoResponse {
    if !state.alerts.alert_exists(&alert_id) {
        return (StatusCode::NOT_FOUND, error_body("unknown alert id")).into_response();
    }
    let session_id = state.alerts.session_id_for_alert(&alert_id);
    (StatusCode::OK, Json(json!({ "alert_id": alert_id, "session_id": session_id }))).into_response()
}

/// GET /alert-types — the alert types the chain registry routes.
pub async fn alert_types(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "alert_types": state.alerts.chain_registry().list_alert_types() }))
}
