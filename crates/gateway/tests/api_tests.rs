//! Handler-level API tests driven through `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use tarsy_domain::config::{Config, ProcessingConfig};
use tarsy_engine::controllers::ControllerSettings;
use tarsy_engine::{AgentFactory, AlertService, ChainRegistry, StaticRunbookFetcher};
use tarsy_gateway::api;
use tarsy_gateway::state::AppState;
use tarsy_gateway::ws::DashboardBroadcaster;
use tarsy_history::{HistoryHook, HistoryStore};
use tarsy_hooks::HookManager;
use tarsy_llm::{LlmClient, LlmManager, MockLlmClient};
use tarsy_mcp::registry::{McpServerConnection, McpServerRegistry};
use tarsy_mcp::testing::ScriptedTransport;
use tarsy_mcp::McpToolClient;

fn test_state() -> AppState {
    // Plenty of final answers so background processing always terminates.
    let turns = (0..64)
        .map(|_| tarsy_llm::mock::ScriptedTurn::Text("Final Answer: ok".into()))
        .collect();
    test_state_with(turns)
}

fn test_state_with(turns: Vec<tarsy_llm::mock::ScriptedTurn>) -> AppState {
    let config = Arc::new(Config::default());
    let hooks = Arc::new(HookManager::new());
    let history = Arc::new(HistoryStore::in_memory().unwrap());
    HistoryHook::register(history.clone(), &hooks);
    let broadcaster = Arc::new(DashboardBroadcaster::new());

    let transport = ScriptedTransport::new()
        .on("tools/list", json!({"tools": []}))
        .on("tools/call", json!({"content": []}));
    let mut registry = McpServerRegistry::empty();
    registry.insert(McpServerConnection::with_transport("kubernetes-server", Box::new(transport), None));
    let mcp_registry = Arc::new(registry);
    let mcp = Arc::new(McpToolClient::new(mcp_registry.clone(), hooks.clone()));

    let llm = Arc::new(LlmManager::with_providers(
        vec![("mock", Arc::new(MockLlmClient::new(turns)) as Arc<dyn LlmClient>)],
        "mock",
        hooks.clone(),
    ));

    let processing = ProcessingConfig::default();
    let settings = ControllerSettings {
        max_iterations: processing.max_total_iterations,
        iteration_timeout: Duration::from_secs(processing.llm_iteration_timeout_secs),
    };
    let factory = AgentFactory::new(llm.clone(), mcp, hooks.clone(), &HashMap::new(), settings);
    let chains = ChainRegistry::new(&HashMap::new(), &factory.known_agents()).unwrap();

    let alerts = Arc::new(AlertService::new(
        processing,
        chains,
        factory,
        llm,
        Some(history.clone()),
        hooks.clone(),
        Arc::new(StaticRunbookFetcher { content: "runbook".into() }),
    ));

    AppState {
        config,
        alerts,
        history: Some(history),
        hooks,
        broadcaster,
        mcp_registry,
    }
}

fn app(state: AppState) -> axum::Router {
    api::router().with_state(state)
}

async fn post_alerts(app: &axum::Router, body: Vec<u8>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/alerts")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn valid_submission() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "alert_type": "kubernetes",
        "runbook": "https://ex/rb.md",
        "data": {"namespace": "stuck-ns"},
    }))
    .unwrap()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Submission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn submit_returns_queued_then_duplicate() {
    // Stall the first run so it is still in flight for the second request.
    let mut turns = vec![tarsy_llm::mock::ScriptedTurn::Stall(
        Duration::from_millis(300),
        "Final Answer: ok".into(),
    )];
    turns.extend((0..8).map(|_| tarsy_llm::mock::ScriptedTurn::Text("Final Answer: ok".into())));
    let state = test_state_with(turns);
    let app = app(state.clone());

    let (status, body) = post_alerts(&app, valid_submission()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "queued");
    let first_id = body["alert_id"].as_str().unwrap().to_owned();

    let (status, body) = post_alerts(&app, valid_submission()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");
    assert_eq!(body["alert_id"], first_id.as_str());

    state.alerts.drain(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn submit_rejects_empty_body() {
    let app = app(test_state());
    let (status, body) = post_alerts(&app, vec![]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Empty request body");
}

#[tokio::test]
async fn submit_rejects_invalid_json() {
    let app = app(test_state());
    let (status, body) = post_alerts(&app, b"{not json".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid JSON"));
}

#[tokio::test]
async fn submit_rejects_non_object_body() {
    let app = app(test_state());
    let (status, _) = post_alerts(&app, b"[1, 2, 3]".to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_missing_fields_is_422_with_detail() {
    let app = app(test_state());
    let (status, body) = post_alerts(&app, serde_json::to_vec(&json!({"alert_type": "x"})).unwrap()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation failed");
    assert!(body["detail"].as_str().unwrap().contains("runbook"));
}

#[tokio::test]
async fn submit_rejects_empty_alert_type_and_runbook() {
    let app = app(test_state());
    let (status, _) = post_alerts(
        &app,
        serde_json::to_vec(&json!({"alert_type": " ", "runbook": "https://x"})).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_alerts(
        &app,
        serde_json::to_vec(&json!({"alert_type": "kubernetes", "runbook": ""})).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn submit_honors_the_payload_size_boundary() {
    let state = test_state();
    let app = app(state.clone());

    // Pad with trailing whitespace (valid JSON) to exactly 10 MB: accepted.
    let mut body = valid_submission();
    body.resize(tarsy_gateway::api::alerts::MAX_PAYLOAD_BYTES, b' ');
    let (status, _) = post_alerts(&app, body.clone()).await;
    assert_eq!(status, StatusCode::OK);

    // One byte past the cap: 413.
    body.push(b' ');
    let (status, _) = post_alerts(&app, body).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    state.alerts.drain(Duration::from_secs(10)).await;
}

#[tokio::test]
async fn submission_payload_is_sanitized() {
    let state = test_state();
    let app = app(state.clone());

    let body = serde_json::to_vec(&json!({
        "alert_type": "kubernetes",
        "runbook": "https://ex/rb.md",
        "data": {"message": "hi <script>alert(1)</script>"},
    }))
    .unwrap();
    let (status, response) = post_alerts(&app, body).await;
    assert_eq!(status, StatusCode::OK);
    let alert_id = response["alert_id"].as_str().unwrap().to_owned();
    state.alerts.drain(Duration::from_secs(10)).await;

    let session_id = state.alerts.session_id_for_alert(&alert_id).unwrap();
    let session = state.history.as_ref().unwrap().get_session(&session_id).unwrap().unwrap();
    let message = session.alert_data["message"].as_str().unwrap();
    assert!(!message.contains("<script"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status + metadata endpoints
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn session_id_lookup() {
    let state = test_state();
    let app = app(state.clone());

    let (status, _) = get(&app, "/session-id/unknown-id").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = post_alerts(&app, valid_submission()).await;
    let alert_id = body["alert_id"].as_str().unwrap().to_owned();
    state.alerts.drain(Duration::from_secs(10)).await;

    let (status, body) = get(&app, &format!("/session-id/{alert_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alert_id"], alert_id.as_str());
    assert!(body["session_id"].is_string());
}

#[tokio::test]
async fn alert_types_come_from_the_registry() {
    let app = app(test_state());
    let (status, body) = get(&app, "/alert-types").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["alert_types"], json!(["kubernetes"]));
}

#[tokio::test]
async fn liveness_and_health() {
    let app = app(test_state());

    let (status, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["history_enabled"], true);
    assert_eq!(body["database_connected"], true);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn history_list_detail_and_filter_options() {
    let state = test_state();
    let app = app(state.clone());

    let (_, body) = post_alerts(&app, valid_submission()).await;
    let alert_id = body["alert_id"].as_str().unwrap().to_owned();
    state.alerts.drain(Duration::from_secs(10)).await;
    let session_id = state.alerts.session_id_for_alert(&alert_id).unwrap();

    let (status, body) = get(&app, "/api/v1/history/sessions?page=1&page_size=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(body["pagination"]["total_items"], 1);

    let (status, body) = get(&app, &format!("/api/v1/history/sessions/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], session_id.as_str());
    assert_eq!(body["stages"].as_array().unwrap().len(), 3);

    let (status, _) = get(&app, "/api/v1/history/sessions/not-a-session").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, "/api/v1/history/filter-options").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["alert_types"].as_array().unwrap().contains(&json!("kubernetes")));
}

#[tokio::test]
async fn history_endpoints_answer_503_when_disabled() {
    let mut state = test_state();
    state.history = None;
    let app = app(state);

    let (status, body) = get(&app, "/api/v1/history/sessions").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "history is disabled");
}
