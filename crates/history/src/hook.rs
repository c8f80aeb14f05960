//! Hook subscriber that persists interaction events.
//!
//! Subscribes to `llm.post`, `llm.error`, `mcp.post`, `mcp.error` and writes
//! the carried interaction row. Session and stage rows are written by the
//! orchestrator directly, so the hook stays append-only.

use std::sync::Arc;

use async_trait::async_trait;

use tarsy_hooks::events;
use tarsy_hooks::{EventHook, HookManager, HookPayload};

use crate::store::HistoryStore;

pub struct HistoryHook {
    store: Arc<HistoryStore>,
}

impl HistoryHook {
    pub fn new(store: Arc<HistoryStore>) -> Self {
        Self { store }
    }

    /// Register on the events this hook consumes.
    pub fn register(store: Arc<HistoryStore>, bus: &HookManager) {
        let hook = Arc::new(Self::new(store));
        bus.register_many(
            &[events::LLM_POST, events::LLM_ERROR, events::MCP_POST, events::MCP_ERROR],
            hook,
        );
    }
}

#[async_trait]
impl EventHook for HistoryHook {
    fn name(&self) -> &str {
        "history"
    }

    async fn execute(&self, event: &str, payload: &HookPayload) -> tarsy_domain::Result<()> {
        match payload {
            HookPayload::Llm(interaction) => self.store.insert_llm_interaction(interaction),
            HookPayload::Mcp(interaction) => self.store.insert_mcp_interaction(interaction),
            HookPayload::Stage(_) => {
                tracing::debug!(event, "history hook ignores stage events");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use tarsy_domain::model::{AlertSession, LlmInteraction, McpCommunicationType, McpInteraction};

    fn seeded_store() -> (Arc<HistoryStore>, AlertSession) {
        let store = Arc::new(HistoryStore::in_memory().unwrap());
        let session = AlertSession::new(
            "a1".into(),
            "kubernetes".into(),
            json!({}),
            "kubernetes".into(),
            json!({}),
        );
        store.create_session(&session).unwrap();
        (store, session)
    }

    #[tokio::test]
    async fn llm_events_become_rows() {
        let (store, session) = seeded_store();
        let bus = HookManager::new();
        HistoryHook::register(store.clone(), &bus);

        let mut interaction = LlmInteraction::new(&session.session_id, None, "gpt-4o");
        interaction.success = true;
        let outcomes = bus.trigger(events::LLM_POST, HookPayload::Llm(interaction)).await;
        assert!(outcomes["history"]);

        let rows = store.llm_interactions_for_session(&session.session_id).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn mcp_error_events_become_rows() {
        let (store, session) = seeded_store();
        let bus = HookManager::new();
        HistoryHook::register(store.clone(), &bus);

        let mut interaction = McpInteraction::new(
            &session.session_id,
            None,
            "forbidden-server",
            McpCommunicationType::ToolCall,
        );
        interaction.error_message = Some("server not allowed".into());
        bus.trigger(events::MCP_ERROR, HookPayload::Mcp(interaction)).await;

        let rows = store.mcp_interactions_for_session(&session.session_id).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].success);
    }
}
