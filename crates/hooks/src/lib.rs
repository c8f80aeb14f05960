//! `tarsy-hooks` — the in-process lifecycle event bus.
//!
//! Producers (LLM manager, tool client, orchestrator) trigger named events
//! (`llm.post`, `mcp.error`, `stage.started`, …) carrying a typed payload.
//! The bus fans out to every enabled subscriber concurrently; a subscriber
//! failure never reaches the producer or its peers, and a subscriber that
//! fails repeatedly is taken out of rotation until re-registered.

pub mod bus;
pub mod events;

pub use bus::{EventHook, HookManager, HookOutcomes};
pub use events::HookPayload;
