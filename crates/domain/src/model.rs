//! Persisted entities of the alert processing timeline.
//!
//! Everything here maps 1:1 onto a table in the history store: one
//! `AlertSession` per accepted alert, one `StageExecution` per stage attempt,
//! and append-only `LlmInteraction` / `McpInteraction` rows for every call
//! the engine makes on behalf of a session.
//!
//! All timestamps are microseconds since the Unix epoch (`i64`), captured
//! through [`now_us`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Current time as microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Statuses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Stage lifecycle: `pending → active → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AlertSession
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One processing session per accepted alert.
///
/// `completed_at_us` is set iff the status is terminal, and is never earlier
/// than `started_at_us`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSession {
    pub session_id: String,
    /// Issuer-facing alert id (unique across sessions).
    pub alert_id: String,
    pub alert_type: String,
    /// Opaque client payload. Never schema-bound inside the engine.
    pub alert_data: Value,
    /// `"chain:<chain_id>"` for chain processing.
    pub agent_type: String,
    pub chain_id: String,
    /// Snapshot of the chain definition at submission time.
    pub chain_definition: Value,
    pub status: SessionStatus,
    pub started_at_us: i64,
    pub completed_at_us: Option<i64>,
    pub current_stage_index: Option<i64>,
    pub current_stage_id: Option<String>,
    pub final_analysis: Option<String>,
    pub error_message: Option<String>,
    pub session_metadata: Option<Value>,
}

impl AlertSession {
    pub fn new(
        alert_id: String,
        alert_type: String,
        alert_data: Value,
        chain_id: String,
        chain_definition: Value,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            alert_id,
            alert_type,
            alert_data,
            agent_type: format!("chain:{chain_id}"),
            chain_id,
            chain_definition,
            status: SessionStatus::Pending,
            started_at_us: now_us(),
            completed_at_us: None,
            current_stage_index: None,
            current_stage_id: None,
            final_analysis: None,
            error_message: None,
            session_metadata: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StageExecution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One stage attempt within a session. `stage_index` is zero-based and dense.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageExecution {
    pub execution_id: String,
    pub session_id: String,
    /// `"<name>_<index>"`.
    pub stage_id: String,
    pub stage_index: i64,
    pub stage_name: String,
    pub agent: String,
    pub status: StageStatus,
    pub started_at_us: Option<i64>,
    pub completed_at_us: Option<i64>,
    pub duration_ms: Option<i64>,
    /// The serialized `AgentExecutionResult` on completion.
    pub stage_output: Option<Value>,
    pub error_message: Option<String>,
}

impl StageExecution {
    pub fn new(session_id: &str, stage_name: &str, agent: &str, stage_index: i64) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            stage_id: format!("{stage_name}_{stage_index}"),
            stage_index,
            stage_name: stage_name.to_owned(),
            agent: agent.to_owned(),
            status: StageStatus::Pending,
            started_at_us: None,
            completed_at_us: None,
            duration_ms: None,
            stage_output: None,
            error_message: None,
        }
    }

    /// Transition to `active` and stamp the start time.
    pub fn mark_started(&mut self) {
        self.status = StageStatus::Active;
        self.started_at_us = Some(now_us());
    }

    /// Transition to `completed`, recording the stage output and duration.
    pub fn mark_completed(&mut self, stage_output: Value, completed_at_us: i64) {
        self.status = StageStatus::Completed;
        self.completed_at_us = Some(completed_at_us);
        self.stage_output = Some(stage_output);
        self.error_message = None;
        self.compute_duration();
    }

    /// Transition to `failed` with the error message.
    pub fn mark_failed(&mut self, error: String) {
        self.status = StageStatus::Failed;
        self.completed_at_us = Some(now_us());
        self.stage_output = None;
        self.error_message = Some(error);
        self.compute_duration();
    }

    fn compute_duration(&mut self) {
        if let (Some(started), Some(completed)) = (self.started_at_us, self.completed_at_us) {
            self.duration_ms = Some((completed - started) / 1000);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized token accounting. Provider adapters map their own shapes into
/// this at the LLM-manager boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmInteraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One LLM call, recorded append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmInteraction {
    pub interaction_id: String,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub timestamp_us: i64,
    pub duration_ms: i64,
    pub model_name: String,
    pub request_json: Value,
    pub response_json: Option<Value>,
    pub tool_calls: Option<Value>,
    pub tool_results: Option<Value>,
    pub token_usage: Option<TokenUsage>,
    pub step_description: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl LlmInteraction {
    pub fn new(session_id: &str, stage_execution_id: Option<&str>, model_name: &str) -> Self {
        Self {
            interaction_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            stage_execution_id: stage_execution_id.map(str::to_owned),
            timestamp_us: now_us(),
            duration_ms: 0,
            model_name: model_name.to_owned(),
            request_json: Value::Null,
            response_json: None,
            tool_calls: None,
            tool_results: None,
            token_usage: None,
            step_description: String::new(),
            success: false,
            error_message: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpInteraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpCommunicationType {
    ToolList,
    ToolCall,
    Result,
}

impl McpCommunicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolList => "tool_list",
            Self::ToolCall => "tool_call",
            Self::Result => "result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tool_list" => Some(Self::ToolList),
            "tool_call" => Some(Self::ToolCall),
            "result" => Some(Self::Result),
            _ => None,
        }
    }
}

/// One tool-server communication, recorded append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpInteraction {
    pub communication_id: String,
    pub session_id: String,
    pub stage_execution_id: Option<String>,
    pub timestamp_us: i64,
    pub duration_ms: i64,
    pub server_name: String,
    pub communication_type: McpCommunicationType,
    pub tool_name: Option<String>,
    pub tool_arguments: Option<Value>,
    pub tool_result: Option<Value>,
    pub available_tools: Option<Value>,
    pub step_description: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl McpInteraction {
    pub fn new(
        session_id: &str,
        stage_execution_id: Option<&str>,
        server_name: &str,
        communication_type: McpCommunicationType,
    ) -> Self {
        Self {
            communication_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            stage_execution_id: stage_execution_id.map(str::to_owned),
            timestamp_us: now_us(),
            duration_ms: 0,
            server_name: server_name.to_owned(),
            communication_type,
            tool_name: None,
            tool_arguments: None,
            tool_result: None,
            available_tools: None,
            step_description: String::new(),
            success: false,
            error_message: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
