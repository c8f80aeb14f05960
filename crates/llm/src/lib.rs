//! `tarsy-llm` — provider-agnostic LLM access.
//!
//! The [`LlmClient`] trait is the single seam between the engine and any
//! model provider; [`LlmManager`] resolves the configured default client and
//! wraps every call in `llm.pre` / `llm.post` / `llm.error` hook events with
//! full request/response JSON and normalized token usage.

pub mod client;
pub mod manager;
pub mod mock;
pub mod openai_compat;

pub use client::{LlmClient, LlmRequest, LlmResponse};
pub use manager::LlmManager;
pub use mock::MockLlmClient;
pub use openai_compat::OpenAiCompatClient;
