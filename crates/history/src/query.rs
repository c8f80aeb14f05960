//! Query API over the timeline store: filtered session lists, the assembled
//! session timeline, and filter options for the dashboard.

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;

use tarsy_domain::error::Result;

use crate::store::{db_err, row_to_session, HistoryStore};
use crate::views::{
    DetailedSession, FilterOptions, PaginatedSessions, Pagination, SessionFilter, SessionSummary,
    StageDetail,
};

const DEFAULT_PAGE_SIZE: u32 = 20;

/// JSON paths inside `alert_data` that the free-text search covers.
const ALERT_DATA_SEARCH_PATHS: &[&str] = &[
    "$.message",
    "$.context",
    "$.namespace",
    "$.pod",
    "$.cluster",
    "$.severity",
    "$.environment",
    "$.runbook",
    "$.id",
];

impl HistoryStore {
    /// List sessions with filters and pagination.
    ///
    /// Filters AND together; the search term is an OR across the searchable
    /// columns and `alert_data` JSON paths, then AND-ed with the rest.
    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<PaginatedSessions> {
        let page = filter.page.unwrap_or(1).max(1);
        let page_size = filter.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

        let mut conditions: Vec<String> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(status) = &filter.status {
            conditions.push("status = ?".into());
            args.push(SqlValue::Text(status.clone()));
        }
        if let Some(agent_type) = &filter.agent_type {
            conditions.push("agent_type = ?".into());
            args.push(SqlValue::Text(agent_type.clone()));
        }
        if let Some(alert_type) = &filter.alert_type {
            conditions.push("alert_type = ?".into());
            args.push(SqlValue::Text(alert_type.clone()));
        }
        if let Some(start) = filter.start_date_us {
            conditions.push("started_at_us >= ?".into());
            args.push(SqlValue::Integer(start));
        }
        if let Some(end) = filter.end_date_us {
            conditions.push("started_at_us <= ?".into());
            args.push(SqlValue::Integer(end));
        }
        if let Some(search) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let term = format!("%{}%", search.to_lowercase());
            let mut ors: Vec<String> = vec![
                "LOWER(COALESCE(error_message, '')) LIKE ?".into(),
                "LOWER(COALESCE(final_analysis, '')) LIKE ?".into(),
                "LOWER(alert_type) LIKE ?".into(),
                "LOWER(agent_type) LIKE ?".into(),
            ];
            for _ in 0..4 {
                args.push(SqlValue::Text(term.clone()));
            }
            for path in ALERT_DATA_SEARCH_PATHS {
                ors.push(format!(
                    "LOWER(COALESCE(json_extract(alert_data, '{path}'), '')) LIKE ?"
                ));
                args.push(SqlValue::Text(term.clone()));
            }
            ors.push("LOWER(COALESCE(session_metadata, '')) LIKE ?".into());
            args.push(SqlValue::Text(term.clone()));
            conditions.push(format!("({})", ors.join(" OR ")));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let conn = self.conn.lock();

        let total_items: u64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM sessions {where_clause}"),
                params_from_iter(args.iter()),
                |r| r.get::<_, i64>(0),
            )
            .map_err(db_err)? as u64;

        let offset = (page as u64 - 1) * page_size as u64;
        let sql = format!(
            r#"
            SELECT *,
                (SELECT COUNT(*) FROM llm_interactions li WHERE li.session_id = sessions.session_id)
                    AS llm_count,
                (SELECT COUNT(*) FROM mcp_interactions mi WHERE mi.session_id = sessions.session_id)
                    AS mcp_count
            FROM sessions {where_clause}
            ORDER BY started_at_us DESC
            LIMIT {page_size} OFFSET {offset}
            "#
        );
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let sessions = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                let session = row_to_session(row)?;
                let llm_count: i64 = row.get("llm_count")?;
                let mcp_count: i64 = row.get("mcp_count")?;
                Ok(SessionSummary {
                    session_id: session.session_id,
                    alert_id: session.alert_id,
                    alert_type: session.alert_type,
                    agent_type: session.agent_type,
                    chain_id: session.chain_id,
                    status: session.status.as_str().to_owned(),
                    started_at_us: session.started_at_us,
                    completed_at_us: session.completed_at_us,
                    error_message: session.error_message,
                    llm_interaction_count: llm_count,
                    mcp_communication_count: mcp_count,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;

        let total_pages = (total_items.div_ceil(page_size as u64)) as u32;
        Ok(PaginatedSessions {
            sessions,
            pagination: Pagination { page, page_size, total_pages, total_items },
        })
    }

    /// Assemble the full session timeline: the session, its stages ordered by
    /// `stage_index`, and each stage's interactions ordered by `timestamp_us`.
    ///
    /// Deterministic: a fixed set of rows always yields an identical view.
    pub fn get_session_timeline(&self, session_id: &str) -> Result<Option<DetailedSession>> {
        let Some(session) = self.get_session(session_id)? else {
            return Ok(None);
        };

        let stages = self.stage_executions_for_session(session_id)?;
        let llm = self.llm_interactions_for_session(session_id)?;
        let mcp = self.mcp_interactions_for_session(session_id)?;
        let total_llm_interactions = llm.len() as i64;
        let total_mcp_communications = mcp.len() as i64;

        let details = stages
            .into_iter()
            .map(|execution| {
                let llm_interactions: Vec<_> = llm
                    .iter()
                    .filter(|i| i.stage_execution_id.as_deref() == Some(&execution.execution_id))
                    .cloned()
                    .collect();
                let mcp_communications: Vec<_> = mcp
                    .iter()
                    .filter(|i| i.stage_execution_id.as_deref() == Some(&execution.execution_id))
                    .cloned()
                    .collect();
                StageDetail {
                    llm_interaction_count: llm_interactions.len() as i64,
                    mcp_communication_count: mcp_communications.len() as i64,
                    llm_interactions,
                    mcp_communications,
                    execution,
                }
            })
            .collect();

        Ok(Some(DetailedSession {
            session,
            stages: details,
            total_llm_interactions,
            total_mcp_communications,
        }))
    }

    /// Distinct filter values for the dashboard dropdowns.
    pub fn get_filter_options(&self) -> Result<FilterOptions> {
        let conn = self.conn.lock();
        let distinct = |column: &str| -> Result<Vec<String>> {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT DISTINCT {column} FROM sessions ORDER BY {column} ASC"
                ))
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            Ok(rows)
        };

        Ok(FilterOptions {
            statuses: distinct("status")?,
            agent_types: distinct("agent_type")?,
            alert_types: distinct("alert_type")?,
            chain_ids: distinct("chain_id")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
