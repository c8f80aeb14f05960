//! SQLite-backed timeline store.
//!
//! One table per persisted entity; timestamps are INTEGER microseconds and
//! opaque payloads are TEXT JSON. The connection sits behind a mutex, which
//! is also what serializes concurrent writers per session / stage execution.
//!
//! Interaction rows are append-only: there is deliberately no update path
//! for `llm_interactions` / `mcp_interactions`.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use tarsy_domain::error::{Error, Result};
use tarsy_domain::model::{
    now_us, AlertSession, LlmInteraction, McpCommunicationType, McpInteraction, SessionStatus,
    StageExecution, StageStatus, TokenUsage,
};

pub struct HistoryStore {
    pub(crate) conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Open (or create) the store at the given path and initialize the schema.
    pub fn open(database_url: &str) -> Result<Self> {
        let conn = if database_url == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(Path::new(database_url))
        }
        .map_err(db_err)?;

        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        tracing::info!(database_url, "history store ready");
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id          TEXT PRIMARY KEY,
                alert_id            TEXT NOT NULL UNIQUE,
                alert_type          TEXT NOT NULL,
                alert_data          TEXT NOT NULL,
                agent_type          TEXT NOT NULL,
                chain_id            TEXT NOT NULL,
                chain_definition    TEXT NOT NULL,
                status              TEXT NOT NULL,
                started_at_us       INTEGER NOT NULL,
                completed_at_us     INTEGER,
                current_stage_index INTEGER,
                current_stage_id    TEXT,
                final_analysis      TEXT,
                error_message       TEXT,
                session_metadata    TEXT
            );

            CREATE TABLE IF NOT EXISTS stage_executions (
                execution_id    TEXT PRIMARY KEY,
                session_id      TEXT NOT NULL,
                stage_id        TEXT NOT NULL,
                stage_index     INTEGER NOT NULL,
                stage_name      TEXT NOT NULL,
                agent           TEXT NOT NULL,
                status          TEXT NOT NULL,
                started_at_us   INTEGER,
                completed_at_us INTEGER,
                duration_ms     INTEGER,
                stage_output    TEXT,
                error_message   TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );

            CREATE TABLE IF NOT EXISTS llm_interactions (
                interaction_id     TEXT PRIMARY KEY,
                session_id         TEXT NOT NULL,
                stage_execution_id TEXT,
                timestamp_us       INTEGER NOT NULL,
                duration_ms        INTEGER NOT NULL,
                model_name         TEXT NOT NULL,
                request_json       TEXT NOT NULL,
                response_json      TEXT,
                tool_calls         TEXT,
                tool_results       TEXT,
                token_usage        TEXT,
                step_description   TEXT NOT NULL,
                success            INTEGER NOT NULL,
                error_message      TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );

            CREATE TABLE IF NOT EXISTS mcp_interactions (
                communication_id   TEXT PRIMARY KEY,
                session_id         TEXT NOT NULL,
                stage_execution_id TEXT,
                timestamp_us       INTEGER NOT NULL,
                duration_ms        INTEGER NOT NULL,
                server_name        TEXT NOT NULL,
                communication_type TEXT NOT NULL,
                tool_name          TEXT,
                tool_arguments     TEXT,
                tool_result        TEXT,
                available_tools    TEXT,
                step_description   TEXT NOT NULL,
                success            INTEGER NOT NULL,
                error_message      TEXT,
                FOREIGN KEY (session_id) REFERENCES sessions(session_id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at_us DESC);
            CREATE INDEX IF NOT EXISTS idx_stages_session ON stage_executions(session_id, stage_index);
            CREATE INDEX IF NOT EXISTS idx_llm_session ON llm_interactions(session_id, timestamp_us);
            CREATE INDEX IF NOT EXISTS idx_mcp_session ON mcp_interactions(session_id, timestamp_us);
            "#,
            )
            .map_err(db_err)
    }

    /// `SELECT 1` connectivity probe for the health endpoint.
    pub fn health_check(&self) -> bool {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .is_ok()
    }

    // ── Sessions ───────────────────────────────────────────────────

    pub fn create_session(&self, session: &AlertSession) -> Result<()> {
        self.conn
            .lock()
            .execute(
                r#"
            INSERT INTO sessions (
                session_id, alert_id, alert_type, alert_data, agent_type, chain_id,
                chain_definition, status, started_at_us, completed_at_us,
                current_stage_index, current_stage_id, final_analysis, error_message,
                session_metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
                params![
                    session.session_id,
                    session.alert_id,
                    session.alert_type,
                    session.alert_data.to_string(),
                    session.agent_type,
                    session.chain_id,
                    session.chain_definition.to_string(),
                    session.status.as_str(),
                    session.started_at_us,
                    session.completed_at_us,
                    session.current_stage_index,
                    session.current_stage_id,
                    session.final_analysis,
                    session.error_message,
                    session.session_metadata.as_ref().map(Value::to_string),
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<AlertSession>> {
        self.conn
            .lock()
            .query_row(
                "SELECT * FROM sessions WHERE session_id = ?1",
                params![session_id],
                row_to_session,
            )
            .optional()
            .map_err(db_err)
    }

    /// Update the session status, stamping `completed_at_us` on terminal
    /// transitions. `final_analysis` / `error_message` are set only when
    /// provided.
    pub fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        final_analysis: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let completed_at = status.is_terminal().then(now_us);
        let changed = self
            .conn
            .lock()
            .execute(
                r#"
            UPDATE sessions SET
                status = ?2,
                completed_at_us = COALESCE(?3, completed_at_us),
                final_analysis = COALESCE(?4, final_analysis),
                error_message = COALESCE(?5, error_message)
            WHERE session_id = ?1
            "#,
                params![session_id, status.as_str(), completed_at, final_analysis, error_message],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn update_session_current_stage(
        &self,
        session_id: &str,
        stage_index: i64,
        stage_execution_id: &str,
    ) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                "UPDATE sessions SET current_stage_index = ?2, current_stage_id = ?3 WHERE session_id = ?1",
                params![session_id, stage_index, stage_execution_id],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Sessions still marked `pending` / `in_progress`.
    pub fn active_sessions(&self) -> Result<Vec<AlertSession>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM sessions WHERE status IN ('pending', 'in_progress') ORDER BY started_at_us",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], row_to_session)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Startup recovery: any session left `pending` / `in_progress` by a
    /// previous run is closed out as failed.
    pub fn cleanup_orphaned_sessions(&self) -> Result<usize> {
        let now = now_us();
        let changed = self
            .conn
            .lock()
            .execute(
                r#"
            UPDATE sessions SET
                status = 'failed',
                error_message = 'Processing was interrupted by a service restart',
                completed_at_us = ?1
            WHERE status IN ('pending', 'in_progress')
            "#,
                params![now],
            )
            .map_err(db_err)?;
        if changed > 0 {
            tracing::warn!(count = changed, "closed orphaned sessions from a previous run");
        }
        Ok(changed)
    }

    // ── Stage executions ───────────────────────────────────────────

    pub fn create_stage_execution(&self, execution: &StageExecution) -> Result<()> {
        self.conn
            .lock()
            .execute(
                r#"
            INSERT INTO stage_executions (
                execution_id, session_id, stage_id, stage_index, stage_name, agent,
                status, started_at_us, completed_at_us, duration_ms, stage_output,
                error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
                params![
                    execution.execution_id,
                    execution.session_id,
                    execution.stage_id,
                    execution.stage_index,
                    execution.stage_name,
                    execution.agent,
                    execution.status.as_str(),
                    execution.started_at_us,
                    execution.completed_at_us,
                    execution.duration_ms,
                    execution.stage_output.as_ref().map(Value::to_string),
                    execution.error_message,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Partial update of the transition-owned fields only.
    pub fn update_stage_execution(&self, execution: &StageExecution) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute(
                r#"
            UPDATE stage_executions SET
                status = ?2,
                started_at_us = COALESCE(?3, started_at_us),
                completed_at_us = COALESCE(?4, completed_at_us),
                duration_ms = COALESCE(?5, duration_ms),
                stage_output = COALESCE(?6, stage_output),
                error_message = ?7
            WHERE execution_id = ?1
            "#,
                params![
                    execution.execution_id,
                    execution.status.as_str(),
                    execution.started_at_us,
                    execution.completed_at_us,
                    execution.duration_ms,
                    execution.stage_output.as_ref().map(Value::to_string),
                    execution.error_message,
                ],
            )
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    pub fn get_stage_execution(&self, execution_id: &str) -> Result<Option<StageExecution>> {
        self.conn
            .lock()
            .query_row(
                "SELECT * FROM stage_executions WHERE execution_id = ?1",
                params![execution_id],
                row_to_stage,
            )
            .optional()
            .map_err(db_err)
    }

    pub fn stage_executions_for_session(&self, session_id: &str) -> Result<Vec<StageExecution>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM stage_executions WHERE session_id = ?1 ORDER BY stage_index ASC")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_stage)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    // ── Interactions (append-only) ─────────────────────────────────

    pub fn insert_llm_interaction(&self, interaction: &LlmInteraction) -> Result<()> {
        self.conn
            .lock()
            .execute(
                r#"
            INSERT INTO llm_interactions (
                interaction_id, session_id, stage_execution_id, timestamp_us,
                duration_ms, model_name, request_json, response_json, tool_calls,
                tool_results, token_usage, step_description, success, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
                params![
                    interaction.interaction_id,
                    interaction.session_id,
                    interaction.stage_execution_id,
                    interaction.timestamp_us,
                    interaction.duration_ms,
                    interaction.model_name,
                    interaction.request_json.to_string(),
                    interaction.response_json.as_ref().map(Value::to_string),
                    interaction.tool_calls.as_ref().map(Value::to_string),
                    interaction.tool_results.as_ref().map(Value::to_string),
                    interaction
                        .token_usage
                        .as_ref()
                        .and_then(|u| serde_json::to_string(u).ok()),
                    interaction.step_description,
                    interaction.success as i64,
                    interaction.error_message,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn insert_mcp_interaction(&self, interaction: &McpInteraction) -> Result<()> {
        self.conn
            .lock()
            .execute(
                r#"
            INSERT INTO mcp_interactions (
                communication_id, session_id, stage_execution_id, timestamp_us,
                duration_ms, server_name, communication_type, tool_name,
                tool_arguments, tool_result, available_tools, step_description,
                success, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
                params![
                    interaction.communication_id,
                    interaction.session_id,
                    interaction.stage_execution_id,
                    interaction.timestamp_us,
                    interaction.duration_ms,
                    interaction.server_name,
                    interaction.communication_type.as_str(),
                    interaction.tool_name,
                    interaction.tool_arguments.as_ref().map(Value::to_string),
                    interaction.tool_result.as_ref().map(Value::to_string),
                    interaction.available_tools.as_ref().map(Value::to_string),
                    interaction.step_description,
                    interaction.success as i64,
                    interaction.error_message,
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    pub fn llm_interactions_for_session(&self, session_id: &str) -> Result<Vec<LlmInteraction>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM llm_interactions WHERE session_id = ?1 ORDER BY timestamp_us ASC, rowid ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_llm)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn mcp_interactions_for_session(&self, session_id: &str) -> Result<Vec<McpInteraction>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM mcp_interactions WHERE session_id = ?1 ORDER BY timestamp_us ASC, rowid ASC",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![session_id], row_to_mcp)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Row mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

fn json_col(row: &Row, name: &str) -> rusqlite::Result<Value> {
    let raw: String = row.get(name)?;
    Ok(serde_json::from_str(&raw).unwrap_or(Value::Null))
}

fn opt_json_col(row: &Row, name: &str) -> rusqlite::Result<Option<Value>> {
    let raw: Option<String> = row.get(name)?;
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub(crate) fn row_to_session(row: &Row) -> rusqlite::Result<AlertSession> {
    let status: String = row.get("status")?;
    Ok(AlertSession {
        session_id: row.get("session_id")?,
        alert_id: row.get("alert_id")?,
        alert_type: row.get("alert_type")?,
        alert_data: json_col(row, "alert_data")?,
        agent_type: row.get("agent_type")?,
        chain_id: row.get("chain_id")?,
        chain_definition: json_col(row, "chain_definition")?,
        status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Failed),
        started_at_us: row.get("started_at_us")?,
        completed_at_us: row.get("completed_at_us")?,
        current_stage_index: row.get("current_stage_index")?,
        current_stage_id: row.get("current_stage_id")?,
        final_analysis: row.get("final_analysis")?,
        error_message: row.get("error_message")?,
        session_metadata: opt_json_col(row, "session_metadata")?,
    })
}

pub(crate) fn row_to_stage(row: &Row) -> rusqlite::Result<StageExecution> {
    let status: String = row.get("status")?;
    Ok(StageExecution {
        execution_id: row.get("execution_id")?,
        session_id: row.get("session_id")?,
        stage_id: row.get("stage_id")?,
        stage_index: row.get("stage_index")?,
        stage_name: row.get("stage_name")?,
        agent: row.get("agent")?,
        status: StageStatus::parse(&status).unwrap_or(StageStatus::Failed),
        started_at_us: row.get("started_at_us")?,
        completed_at_us: row.get("completed_at_us")?,
        duration_ms: row.get("duration_ms")?,
        stage_output: opt_json_col(row, "stage_output")?,
        error_message: row.get("error_message")?,
    })
}

pub(crate) fn row_to_llm(row: &Row) -> rusqlite::Result<LlmInteraction> {
    let usage: Option<String> = row.get("token_usage")?;
    Ok(LlmInteraction {
        interaction_id: row.get("interaction_id")?,
        session_id: row.get("session_id")?,
        stage_execution_id: row.get("stage_execution_id")?,
        timestamp_us: row.get("timestamp_us")?,
        duration_ms: row.get("duration_ms")?,
        model_name: row.get("model_name")?,
        request_json: json_col(row, "request_json")?,
        response_json: opt_json_col(row, "response_json")?,
        tool_calls: opt_json_col(row, "tool_calls")?,
        tool_results: opt_json_col(row, "tool_results")?,
        token_usage: usage.and_then(|s| serde_json::from_str::<TokenUsage>(&s).ok()),
        step_description: row.get("step_description")?,
        success: row.get::<_, i64>("success")? != 0,
        error_message: row.get("error_message")?,
    })
}

pub(crate) fn row_to_mcp(row: &Row) -> rusqlite::Result<McpInteraction> {
    let comm_type: String = row.get("communication_type")?;
    Ok(McpInteraction {
        communication_id: row.get("communication_id")?,
        session_id: row.get("session_id")?,
        stage_execution_id: row.get("stage_execution_id")?,
        timestamp_us: row.get("timestamp_us")?,
        duration_ms: row.get("duration_ms")?,
        server_name: row.get("server_name")?,
        communication_type: McpCommunicationType::parse(&comm_type)
            .unwrap_or(McpCommunicationType::Result),
        tool_name: row.get("tool_name")?,
        tool_arguments: opt_json_col(row, "tool_arguments")?,
        tool_result: opt_json_col(row, "tool_result")?,
        available_tools: opt_json_col(row, "available_tools")?,
        step_description: row.get("step_description")?,
        success: row.get::<_, i64>("success")? != 0,
        error_message: row.get("error_message")?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
