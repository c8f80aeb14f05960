//! Tool client: executes tool discovery and tool calls on behalf of agents.
//!
//! Every operation emits `mcp.pre` before contacting the server and
//! `mcp.post` / `mcp.error` with the finished interaction record. Tool-list
//! failures surface as errors (fatal to the stage); tool-call failures come
//! back as error outcomes the controller turns into observations.

use std::sync::Arc;

use serde_json::Value;

use tarsy_domain::context::{ToolOutcome, ToolSpec};
use tarsy_domain::error::Result;
use tarsy_domain::model::{now_us, McpCommunicationType, McpInteraction};
use tarsy_hooks::{events, HookManager, HookPayload};

use crate::registry::McpServerRegistry;

pub struct McpToolClient {
    registry: Arc<McpServerRegistry>,
    hooks: Arc<HookManager>,
}

impl McpToolClient {
    pub fn new(registry: Arc<McpServerRegistry>, hooks: Arc<HookManager>) -> Self {
        Self { registry, hooks }
    }

    pub fn registry(&self) -> &McpServerRegistry {
        &self.registry
    }

    /// Discover the tools one server offers. Failure is fatal to the stage.
    pub async fn list_tools(
        &self,
        session_id: &str,
        stage_execution_id: Option<&str>,
        server: &str,
    ) -> Result<Vec<ToolSpec>> {
        let mut interaction =
            McpInteraction::new(session_id, stage_execution_id, server, McpCommunicationType::ToolList);
        interaction.step_description = format!("list tools on {server}");
        let started = now_us();

        self.hooks
            .trigger(events::MCP_PRE, HookPayload::Mcp(interaction.clone()))
            .await;

        let result = match self.registry.resolve(&[server.to_owned()]) {
            Ok(conns) => conns[0].list_tools().await,
            Err(e) => Err(e),
        };

        interaction.duration_ms = (now_us() - started) / 1000;
        match result {
            Ok(defs) => {
                let specs: Vec<ToolSpec> = defs
                    .into_iter()
                    .map(|def| ToolSpec {
                        server: server.to_owned(),
                        name: def.name,
                        description: def.description,
                        input_schema: def.input_schema,
                    })
                    .collect();
                interaction.success = true;
                interaction.available_tools = serde_json::to_value(&specs).ok();
                self.hooks
                    .trigger(events::MCP_POST, HookPayload::Mcp(interaction))
                    .await;
                Ok(specs)
            }
            Err(e) => {
                interaction.error_message = Some(e.to_string());
                self.hooks
                    .trigger(events::MCP_ERROR, HookPayload::Mcp(interaction))
                    .await;
                Err(e)
            }
        }
    }

    /// Execute one tool call. Never panics the loop: failures come back as
    /// error outcomes, and every attempt is recorded as an interaction.
    pub async fn call_tool(
        &self,
        session_id: &str,
        stage_execution_id: Option<&str>,
        server: &str,
        tool: &str,
        parameters: Value,
    ) -> ToolOutcome {
        let mut interaction =
            McpInteraction::new(session_id, stage_execution_id, server, McpCommunicationType::ToolCall);
        interaction.tool_name = Some(tool.to_owned());
        interaction.tool_arguments = Some(parameters.clone());
        interaction.step_description = describe_tool_call(server, tool, &parameters);
        let started = now_us();

        self.hooks
            .trigger(events::MCP_PRE, HookPayload::Mcp(interaction.clone()))
            .await;

        let result = match self.registry.resolve(&[server.to_owned()]) {
            Ok(conns) => conns[0].call_tool(tool, parameters).await,
            Err(e) => Err(e),
        };

        interaction.duration_ms = (now_us() - started) / 1000;
        match result {
            Ok(value) => {
                interaction.success = true;
                interaction.tool_result = Some(value.clone());
                self.hooks
                    .trigger(events::MCP_POST, HookPayload::Mcp(interaction))
                    .await;
                ToolOutcome::success(server, tool, value)
            }
            Err(e) => {
                let message = e.to_string();
                interaction.error_message = Some(message.clone());
                self.hooks
                    .trigger(events::MCP_ERROR, HookPayload::Mcp(interaction))
                    .await;
                ToolOutcome::failure(server, tool, message)
            }
        }
    }
}

/// `"<tool>(<k>=<v>, …) on <server>"` for dashboards and timeline rows.
pub fn describe_tool_call(server: &str, tool: &str, parameters: &Value) -> String {
    let args = match parameters.as_object() {
        Some(map) if !map.is_empty() => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };
    format!("{tool}({args}) on {server}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
