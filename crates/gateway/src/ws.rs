//! Broadcast layer: WebSocket dashboard/session channels.
//!
//! Flow:
//! 1. A dashboard client connects to `/ws/dashboard/{user_id}`.
//! 2. It subscribes to logical channels (`dashboard`, `alerts`,
//!    `session:<id>`).
//! 3. The [`DashboardHook`] translates hook-bus events into a compact
//!    dashboard update and a richer per-session update and pushes them to
//!    subscribed connections.
//!
//! Broadcast failures are logged and never surfaced to producers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use tarsy_domain::model::{LlmInteraction, McpInteraction, StageExecution};
use tarsy_hooks::{events, EventHook, HookManager, HookPayload};

use crate::state::AppState;

/// Preview caps for session updates.
const LLM_PREVIEW_CHARS: usize = 200;
const MCP_PREVIEW_CHARS: usize = 300;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcaster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Connection {
    user_id: String,
    sender: mpsc::Sender<String>,
    channels: HashSet<String>,
}

/// Per-user WebSocket connections and their channel subscriptions.
pub struct DashboardBroadcaster {
    connections: RwLock<HashMap<String, Connection>>,
}

impl Default for DashboardBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardBroadcaster {
    pub fn new() -> Self {
        Self { connections: RwLock::new(HashMap::new()) }
    }

    /// Register a connection; returns its id and the outbound message feed.
    pub fn register(&self, user_id: &str) -> (String, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(256);
        let connection_id = uuid::Uuid::new_v4().to_string();
        self.connections.write().insert(
            connection_id.clone(),
            Connection { user_id: user_id.to_owned(), sender, channels: HashSet::new() },
        );
        tracing::info!(user_id, connection_id = %connection_id, "dashboard client connected");
        (connection_id, receiver)
    }

    pub fn unregister(&self, connection_id: &str) {
        if let Some(conn) = self.connections.write().remove(connection_id) {
            tracing::info!(user_id = %conn.user_id, connection_id, "dashboard client disconnected");
        }
    }

    pub fn subscribe(&self, connection_id: &str, channel: &str) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(connection_id) {
            Some(conn) => {
                conn.channels.insert(channel.to_owned());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, connection_id: &str, channel: &str) {
        if let Some(conn) = self.connections.write().get_mut(connection_id) {
            conn.channels.remove(channel);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Push a message to every connection subscribed to the channel.
    /// Slow or closed clients are skipped; delivery problems never propagate.
    pub fn broadcast(&self, channel: &str, message: &Value) {
        let text = message.to_string();
        let connections = self.connections.read();
        for (connection_id, conn) in connections.iter() {
            if !conn.channels.contains(channel) {
                continue;
            }
            if let Err(e) = conn.sender.try_send(text.clone()) {
                tracing::debug!(
                    connection_id,
                    channel,
                    error = %e,
                    "dropping broadcast to slow or closed client"
                );
            }
        }
    }
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DashboardHook — hook bus → broadcast
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DashboardHook {
    broadcaster: Arc<DashboardBroadcaster>,
}

impl DashboardHook {
    pub fn new(broadcaster: Arc<DashboardBroadcaster>) -> Self {
        Self { broadcaster }
    }

    /// Register on every event the dashboard cares about.
    pub fn register(broadcaster: Arc<DashboardBroadcaster>, bus: &HookManager) {
        let hook = Arc::new(Self::new(broadcaster));
        bus.register_many(
            &[
                events::LLM_POST,
                events::LLM_ERROR,
                events::MCP_POST,
                events::MCP_ERROR,
                events::STAGE_STARTED,
                events::STAGE_COMPLETED,
                events::STAGE_FAILED,
            ],
            hook,
        );
    }

    fn llm_updates(interaction: &LlmInteraction) -> (Value, Value) {
        let compact = json!({
            "type": "dashboard_update",
            "interaction_type": "llm",
            "session_id": interaction.session_id,
            "stage_execution_id": interaction.stage_execution_id,
            "step_description": interaction.step_description,
            "success": interaction.success,
            "timestamp_us": interaction.timestamp_us,
        });
        let response_preview = interaction
            .response_json
            .as_ref()
            .and_then(|r| r.get("content"))
            .and_then(Value::as_str)
            .map(|c| truncate_str(c, LLM_PREVIEW_CHARS));
        let rich = json!({
            "type": "llm_interaction",
            "session_id": interaction.session_id,
            "stage_execution_id": interaction.stage_execution_id,
            "interaction_id": interaction.interaction_id,
            "model_name": interaction.model_name,
            "step_description": interaction.step_description,
            "duration_ms": interaction.duration_ms,
            "success": interaction.success,
            "error_message": interaction.error_message,
            "token_usage": interaction.token_usage,
            "response_preview": response_preview,
            "timestamp_us": interaction.timestamp_us,
        });
        (compact, rich)
    }

    fn mcp_updates(interaction: &McpInteraction) -> (Value, Value) {
        let compact = json!({
            "type": "dashboard_update",
            "interaction_type": "mcp",
            "session_id": interaction.session_id,
            "stage_execution_id": interaction.stage_execution_id,
            "step_description": interaction.step_description,
            "success": interaction.success,
            "timestamp_us": interaction.timestamp_us,
        });
        let result_preview = interaction
            .tool_result
            .as_ref()
            .map(|r| truncate_str(&r.to_string(), MCP_PREVIEW_CHARS));
        let rich = json!({
            "type": "mcp_communication",
            "session_id": interaction.session_id,
            "stage_execution_id": interaction.stage_execution_id,
            "communication_id": interaction.communication_id,
            "server_name": interaction.server_name,
            "communication_type": interaction.communication_type,
            "tool_name": interaction.tool_name,
            "step_description": interaction.step_description,
            "duration_ms": interaction.duration_ms,
            "success": interaction.success,
            "error_message": interaction.error_message,
            "result_preview": result_preview,
            "timestamp_us": interaction.timestamp_us,
        });
        (compact, rich)
    }

    fn stage_updates(event: &str, execution: &StageExecution) -> (Value, Value) {
        let update_type = match event {
            events::STAGE_STARTED => "stage_started",
            events::STAGE_COMPLETED => "stage_completed",
            _ => "stage_failed",
        };
        let compact = json!({
            "type": "session_update",
            "session_id": execution.session_id,
            "stage_id": execution.stage_id,
            "stage_index": execution.stage_index,
            "stage_status": execution.status,
        });
        let rich = json!({
            "type": update_type,
            "session_id": execution.session_id,
            "execution_id": execution.execution_id,
            "stage_id": execution.stage_id,
            "stage_index": execution.stage_index,
            "stage_name": execution.stage_name,
            "agent": execution.agent,
            "status": execution.status,
            "duration_ms": execution.duration_ms,
            "error_message": execution.error_message,
        });
        (compact, rich)
    }
}

#[async_trait]
impl EventHook for DashboardHook {
    fn name(&self) -> &str {
        "dashboard"
    }

    async fn execute(&self, event: &str, payload: &HookPayload) -> tarsy_domain::Result<()> {
        let (compact, rich) = match payload {
            HookPayload::Llm(interaction) => Self::llm_updates(interaction),
            HookPayload::Mcp(interaction) => Self::mcp_updates(interaction),
            HookPayload::Stage(execution) => Self::stage_updates(event, execution),
        };
        self.broadcaster.broadcast("dashboard", &compact);
        self.broadcaster.broadcast("alerts", &compact);
        self.broadcaster
            .broadcast(&format!("session:{}", payload.session_id()), &rich);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type")]
    kind: String,
    channel: String,
}

fn is_valid_channel(channel: &str) -> bool {
    channel == "dashboard" || channel == "alerts" || channel.starts_with("session:")
}

/// GET /ws/dashboard/{user_id} — upgrade to WebSocket.
pub async fn dashboard_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (connection_id, mut outbound) = state.broadcaster.register(&user_id);

    // Writer task: forwards broadcast messages to the socket.
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if ws_sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: subscribe/unsubscribe requests from the client.
    while let Some(Ok(message)) = ws_stream.next().await {
        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) if !is_valid_channel(&msg.channel) => json!({
                        "type": "error",
                        "message": format!("unknown channel '{}'", msg.channel),
                    }),
                    Ok(msg) => match msg.kind.as_str() {
                        "subscribe" => {
                            state.broadcaster.subscribe(&connection_id, &msg.channel);
                            json!({"type": "subscribed", "channel": msg.channel})
                        }
                        "unsubscribe" => {
                            state.broadcaster.unsubscribe(&connection_id, &msg.channel);
                            json!({"type": "unsubscribed", "channel": msg.channel})
                        }
                        other => json!({
                            "type": "error",
                            "message": format!("unknown message type '{other}'"),
                        }),
                    },
                    // Invalid JSON gets a typed error and the socket stays open.
                    Err(e) => json!({"type": "error", "message": format!("invalid JSON: {e}")}),
                };
                let conns = state.broadcaster.connections.read();
                if let Some(conn) = conns.get(&connection_id) {
                    let _ = conn.sender.try_send(reply.to_string());
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.broadcaster.unregister(&connection_id);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_domain::model::McpCommunicationType;

    #[tokio::test]
    async fn broadcast_reaches_only_subscribed_channels() {
        let broadcaster = DashboardBroadcaster::new();
        let (id_a, mut rx_a) = broadcaster.register("alice");
        let (_id_b, mut rx_b) = broadcaster.register("bob");
        broadcaster.subscribe(&id_a, "dashboard");

        broadcaster.broadcast("dashboard", &json!({"type": "dashboard_update"}));

        let text = rx_a.try_recv().unwrap();
        assert!(text.contains("dashboard_update"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broadcaster = DashboardBroadcaster::new();
        let (id, mut rx) = broadcaster.register("alice");
        broadcaster.subscribe(&id, "alerts");
        broadcaster.unsubscribe(&id, "alerts");
        broadcaster.broadcast("alerts", &json!({"x": 1}));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_drops_the_connection() {
        let broadcaster = DashboardBroadcaster::new();
        let (id, _rx) = broadcaster.register("alice");
        assert_eq!(broadcaster.connection_count(), 1);
        broadcaster.unregister(&id);
        assert_eq!(broadcaster.connection_count(), 0);
        assert!(!broadcaster.subscribe(&id, "dashboard"));
    }

    #[tokio::test]
    async fn hook_translates_mcp_events_with_preview_cap() {
        let broadcaster = Arc::new(DashboardBroadcaster::new());
        let bus = HookManager::new();
        DashboardHook::register(broadcaster.clone(), &bus);

        let (id, mut rx) = broadcaster.register("alice");
        broadcaster.subscribe(&id, "session:s1");

        let mut interaction = McpInteraction::new("s1", Some("e1"), "kubernetes-server", McpCommunicationType::ToolCall);
        interaction.tool_name = Some("kubectl_get".into());
        interaction.tool_result = Some(json!("x".repeat(500)));
        interaction.success = true;
        bus.trigger(events::MCP_POST, HookPayload::Mcp(interaction)).await;

        let text = rx.try_recv().unwrap();
        let message: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(message["type"], "mcp_communication");
        let preview = message["result_preview"].as_str().unwrap();
        // 300 chars + ellipsis.
        assert!(preview.len() <= MCP_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[tokio::test]
    async fn hook_translates_llm_events_to_both_shapes() {
        let broadcaster = Arc::new(DashboardBroadcaster::new());
        let bus = HookManager::new();
        DashboardHook::register(broadcaster.clone(), &bus);

        let (id, mut rx) = broadcaster.register("alice");
        broadcaster.subscribe(&id, "dashboard");
        broadcaster.subscribe(&id, "session:s1");

        let mut interaction = LlmInteraction::new("s1", Some("e1"), "gpt-4o");
        interaction.success = true;
        interaction.response_json = Some(json!({"content": "y".repeat(400)}));
        bus.trigger(events::LLM_POST, HookPayload::Llm(interaction)).await;

        let first: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        let second: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "dashboard_update");
        assert_eq!(second["type"], "llm_interaction");
        let preview = second["response_preview"].as_str().unwrap();
        assert!(preview.len() <= LLM_PREVIEW_CHARS + 3);
    }

    #[tokio::test]
    async fn stage_events_map_to_typed_updates() {
        let broadcaster = Arc::new(DashboardBroadcaster::new());
        let bus = HookManager::new();
        DashboardHook::register(broadcaster.clone(), &bus);

        let (id, mut rx) = broadcaster.register("alice");
        broadcaster.subscribe(&id, "session:s1");

        let mut execution = StageExecution::new("s1", "data-collection", "KubernetesAgent", 0);
        execution.mark_started();
        bus.trigger(events::STAGE_STARTED, HookPayload::Stage(execution)).await;

        let message: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(message["type"], "stage_started");
        assert_eq!(message["stage_id"], "data-collection_0");
    }

    #[test]
    fn channel_validation() {
        assert!(is_valid_channel("dashboard"));
        assert!(is_valid_channel("alerts"));
        assert!(is_valid_channel("session:abc"));
        assert!(!is_valid_channel("random"));
    }
}
