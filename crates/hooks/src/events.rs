//! Event names and payloads carried across the hook bus.

use serde::Serialize;

use tarsy_domain::model::{LlmInteraction, McpInteraction, StageExecution};

// Canonical event names. Producers use these constants; subscribers may
// register for any subset.
pub const LLM_PRE: &str = "llm.pre";
pub const LLM_POST: &str = "llm.post";
pub const LLM_ERROR: &str = "llm.error";
pub const MCP_PRE: &str = "mcp.pre";
pub const MCP_POST: &str = "mcp.post";
pub const MCP_ERROR: &str = "mcp.error";
pub const STAGE_STARTED: &str = "stage.started";
pub const STAGE_COMPLETED: &str = "stage.completed";
pub const STAGE_FAILED: &str = "stage.failed";

/// Typed payload delivered with every event.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum HookPayload {
    Llm(LlmInteraction),
    Mcp(McpInteraction),
    Stage(StageExecution),
}

impl HookPayload {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Llm(i) => &i.session_id,
            Self::Mcp(i) => &i.session_id,
            Self::Stage(e) => &e.session_id,
        }
    }

    pub fn as_llm(&self) -> Option<&LlmInteraction> {
        match self {
            Self::Llm(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_mcp(&self) -> Option<&McpInteraction> {
        match self {
            Self::Mcp(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_stage(&self) -> Option<&StageExecution> {
        match self {
            Self::Stage(e) => Some(e),
            _ => None,
        }
    }
}
