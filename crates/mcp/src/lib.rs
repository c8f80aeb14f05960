//! `tarsy-mcp` — tool server registry and client.
//!
//! Tool servers are external processes speaking JSON-RPC 2.0 over stdio
//! (the Model Context Protocol). The registry owns one connection per
//! configured server; the client executes `tools/list` / `tools/call` on
//! behalf of agents, emits `mcp.*` hook events with the canonical
//! interaction payload, and applies configured output masking.

pub mod client;
pub mod masking;
pub mod protocol;
pub mod registry;
pub mod testing;
pub mod transport;

pub use client::McpToolClient;
pub use masking::DataMasker;
pub use registry::{McpServerConnection, McpServerRegistry};
pub use transport::{McpTransport, TransportError};
