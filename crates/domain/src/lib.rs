//! `tarsy-domain` — shared types for the Tarsy alert processing engine.
//!
//! This crate holds everything the other crates agree on:
//! - the shared [`error::Error`] type,
//! - service configuration ([`config`]),
//! - persisted entities ([`model`]): sessions, stage executions, interactions,
//! - runtime carriers ([`context`]): `ChainContext`, `StageContext`,
//! - chain definitions ([`chain`]),
//! - provider-agnostic LLM conversation types ([`llm`]),
//! - alert submission types and the duplicate-suppression key ([`alert`]).

pub mod alert;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod model;

pub use error::{Error, Result};
pub use model::now_us;
