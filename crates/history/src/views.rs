//! Query DTOs for the history API.

use serde::{Deserialize, Serialize};

use tarsy_domain::model::{AlertSession, LlmInteraction, McpInteraction, StageExecution};

/// Filters for the session list endpoint. All filters AND together; the
/// `search` term expands to an OR over the searchable columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub status: Option<String>,
    pub agent_type: Option<String>,
    pub alert_type: Option<String>,
    pub search: Option<String>,
    pub start_date_us: Option<i64>,
    pub end_date_us: Option<i64>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// One row of the session list.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub alert_id: String,
    pub alert_type: String,
    pub agent_type: String,
    pub chain_id: String,
    pub status: String,
    pub started_at_us: i64,
    pub completed_at_us: Option<i64>,
    pub error_message: Option<String>,
    pub llm_interaction_count: i64,
    pub mcp_communication_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub total_items: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaginatedSessions {
    pub sessions: Vec<SessionSummary>,
    pub pagination: Pagination,
}

/// One stage with its chronological interactions.
#[derive(Debug, Clone, Serialize)]
pub struct StageDetail {
    #[serde(flatten)]
    pub execution: StageExecution,
    pub llm_interactions: Vec<LlmInteraction>,
    pub mcp_communications: Vec<McpInteraction>,
    pub llm_interaction_count: i64,
    pub mcp_communication_count: i64,
}

/// The full session timeline: the session, its stages ordered by index, and
/// each stage's interactions ordered by timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedSession {
    #[serde(flatten)]
    pub session: AlertSession,
    pub stages: Vec<StageDetail>,
    pub total_llm_interactions: i64,
    pub total_mcp_communications: i64,
}

/// Distinct values the dashboard offers as filter dropdowns.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub statuses: Vec<String>,
    pub agent_types: Vec<String>,
    pub alert_types: Vec<String>,
    pub chain_ids: Vec<String>,
}
