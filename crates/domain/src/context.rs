//! Runtime carriers for chain and stage execution.
//!
//! `ChainContext` is the per-session mutable carrier flowing between stages;
//! `StageContext` is the read-mostly view a controller sees for one stage.
//! Neither is persisted — the history store keeps its own records.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::now_us;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool discovered from a tool server, as shown to the prompt builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub server: String,
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's parameters.
    pub input_schema: Value,
}

impl ToolSpec {
    /// `"<server>.<tool>"` — the action name the model must emit.
    pub fn action_name(&self) -> String {
        format!("{}.{}", self.server, self.name)
    }
}

/// Ordered tool listing for one stage. Contains every tool the agent is
/// allowed to invoke and no others.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AvailableTools {
    pub tools: Vec<ToolSpec>,
}

impl AvailableTools {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// One `"<server>.<tool>: <description>"` line per tool.
    pub fn to_prompt_format(&self) -> String {
        if self.tools.is_empty() {
            return "No tools available.".to_string();
        }
        self.tools
            .iter()
            .map(|t| format!("{}: {}", t.action_name(), t.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A resolved tool invocation request, ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub server: String,
    pub tool: String,
    pub parameters: Value,
    /// Why the controller issued this call (shown in step descriptions).
    pub reason: String,
}

/// Outcome of one dispatched tool request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub server: String,
    pub tool: String,
    /// Structured result on success.
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn success(server: &str, tool: &str, result: Value) -> Self {
        Self {
            server: server.to_owned(),
            tool: tool.to_owned(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(server: &str, tool: &str, error: impl Into<String>) -> Self {
        Self {
            server: server.to_owned(),
            tool: tool.to_owned(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AgentExecutionResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageResultStatus {
    Completed,
    Failed,
}

/// The result an agent hands back for one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub status: StageResultStatus,
    pub result_summary: String,
    /// Clean analysis text for API/dashboard consumption.
    pub final_analysis: Option<String>,
    pub agent_name: String,
    pub stage_description: Option<String>,
    pub timestamp_us: i64,
    pub iterations: u32,
    pub error_message: Option<String>,
    /// Failed stages are recoverable: later stages still execute.
    #[serde(default)]
    pub recoverable: bool,
}

impl AgentExecutionResult {
    pub fn completed(
        agent_name: &str,
        stage_description: Option<String>,
        result_summary: String,
        final_analysis: String,
        iterations: u32,
    ) -> Self {
        Self {
            status: StageResultStatus::Completed,
            result_summary,
            final_analysis: Some(final_analysis),
            agent_name: agent_name.to_owned(),
            stage_description,
            timestamp_us: now_us(),
            iterations,
            error_message: None,
            recoverable: false,
        }
    }

    pub fn failed(agent_name: &str, stage_description: Option<String>, error: String) -> Self {
        Self {
            status: StageResultStatus::Failed,
            result_summary: format!("Stage failed: {error}"),
            final_analysis: None,
            agent_name: agent_name.to_owned(),
            stage_description,
            timestamp_us: now_us(),
            iterations: 0,
            error_message: Some(error),
            recoverable: true,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StageResultStatus::Completed
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChainContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-session mutable carrier flowing between stages.
///
/// `stage_outputs` preserves insertion order; an entry is appended only after
/// its stage finishes and is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub alert_type: String,
    pub alert_data: Value,
    pub session_id: String,
    pub runbook_content: Option<String>,
    pub chain_id: Option<String>,
    pub current_stage_name: String,
    stage_outputs: Vec<(String, AgentExecutionResult)>,
}

impl ChainContext {
    pub fn new(alert_type: &str, alert_data: Value, session_id: &str) -> Self {
        Self {
            alert_type: alert_type.to_owned(),
            alert_data,
            session_id: session_id.to_owned(),
            runbook_content: None,
            chain_id: None,
            current_stage_name: String::new(),
            stage_outputs: Vec::new(),
        }
    }

    pub fn runbook_content(&self) -> &str {
        self.runbook_content.as_deref().unwrap_or("")
    }

    /// Append a finished stage's result. Completed entries are never mutated.
    pub fn add_stage_result(&mut self, stage_name: &str, result: AgentExecutionResult) {
        self.stage_outputs.push((stage_name.to_owned(), result));
    }

    /// All stage outputs in execution order.
    pub fn stage_outputs(&self) -> &[(String, AgentExecutionResult)] {
        &self.stage_outputs
    }

    /// Completed stage results in execution order.
    pub fn previous_stages_results(&self) -> Vec<(&str, &AgentExecutionResult)> {
        self.stage_outputs
            .iter()
            .filter(|(_, r)| r.is_completed())
            .map(|(name, r)| (name.as_str(), r))
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read-mostly view for one stage execution. Holds references into the
/// current `ChainContext` — no duplication.
pub struct StageContext<'a> {
    pub chain: &'a ChainContext,
    pub available_tools: &'a AvailableTools,
    pub agent_name: &'a str,
    pub custom_instructions: &'a str,
    pub mcp_servers: &'a [String],
    pub stage_execution_id: &'a str,
}

impl StageContext<'_> {
    pub fn session_id(&self) -> &str {
        &self.chain.session_id
    }

    pub fn stage_name(&self) -> &str {
        &self.chain.current_stage_name
    }

    pub fn alert_data(&self) -> &Value {
        &self.chain.alert_data
    }

    pub fn runbook_content(&self) -> &str {
        self.chain.runbook_content()
    }

    pub fn has_previous_stages(&self) -> bool {
        !self.chain.previous_stages_results().is_empty()
    }

    /// Format previous stage results for prompts, in execution order.
    pub fn format_previous_stages(&self) -> String {
        let results = self.chain.previous_stages_results();
        if results.is_empty() {
            return "No previous stage context available.".to_string();
        }
        let mut sections = Vec::new();
        for (stage_name, result) in results {
            let title = result.stage_description.as_deref().unwrap_or(stage_name);
            sections.push(format!("## Results from '{title}' stage:"));
            sections.push(result.result_summary.clone());
            sections.push(String::new());
        }
        sections.join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
