//! `tarsy-engine` — the alert processing engine.
//!
//! Everything between an accepted alert and its finished analysis lives
//! here: the prompt builder, the ReAct response parser, the four iteration
//! controllers, the agent (with its tool-execution seam), the chain
//! registry, and the orchestrating alert service.

pub mod agent;
pub mod cache;
pub mod chain_registry;
pub mod controllers;
pub mod executor;
pub mod parser;
pub mod prompt;
pub mod runbook;
pub mod service;

pub use agent::{Agent, AgentFactory};
pub use chain_registry::ChainRegistry;
pub use executor::ToolExecutor;
pub use runbook::{HttpRunbookFetcher, RunbookFetcher, StaticRunbookFetcher};
pub use service::{AlertService, SubmissionOutcome};
