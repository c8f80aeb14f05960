pub mod alerts;
pub mod health;
pub mod history;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Liveness + health
        .route("/", get(health::liveness))
        .route("/health", get(health::health))
        // Alert submission + status
        .route("/alerts", post(alerts::submit_alert))
        .route("/session-id/:alert_id", get(alerts::session_id_for_alert))
        .route("/alert-types", get(alerts::alert_types))
        // History
        .route("/api/v1/history/sessions", get(history::list_sessions))
        .route("/api/v1/history/sessions/:session_id", get(history::session_detail))
        .route("/api/v1/history/active-sessions", get(history::active_sessions))
        .route("/api/v1/history/filter-options", get(history::filter_options))
        // Dashboard WebSocket
        .route("/ws/dashboard/:user_id", get(ws::dashboard_ws))
        // The submission handler enforces its own 10 MB cap so it can
        // answer 413 with a curated body; leave headroom above it here.
        .layer(DefaultBodyLimit::max(alerts::MAX_PAYLOAD_BYTES + 64 * 1024))
}
