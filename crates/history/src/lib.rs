//! `tarsy-history` — the append-mostly timeline store.
//!
//! Owns all durable state: sessions, stage executions, and the append-only
//! LLM/MCP interaction rows, persisted in SQLite. Also provides the
//! [`hook::HistoryHook`] subscriber that captures interaction events off the
//! hook bus, and the query API the history endpoints are built on.

pub mod hook;
pub mod query;
pub mod store;
pub mod views;

pub use hook::HistoryHook;
pub use store::HistoryStore;
pub use views::{
    DetailedSession, FilterOptions, PaginatedSessions, SessionFilter, SessionSummary, StageDetail,
};
