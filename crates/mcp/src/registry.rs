//! Tool server registry.
//!
//! Owns one connection per configured server, spawned and handshaken at
//! startup. Individual server failures are logged and skipped; a server an
//! agent requires but the registry does not hold is a configuration error
//! at stage entry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use tarsy_domain::config::McpServerConfig;
use tarsy_domain::error::{Error, Result};

use crate::masking::DataMasker;
use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, StdioTransport};

/// One live tool server connection.
pub struct McpServerConnection {
    pub name: String,
    transport: Box<dyn McpTransport>,
    masker: Option<DataMasker>,
}

impl std::fmt::Debug for McpServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServerConnection").field("name", &self.name).finish_non_exhaustive()
    }
}

impl McpServerConnection {
    /// Spawn the process, perform the MCP handshake.
    async fn initialize(name: &str, config: &McpServerConfig) -> Result<Self> {
        let transport: Box<dyn McpTransport> = Box::new(
            StdioTransport::spawn(config)
                .map_err(|e| Error::ToolServer { server: name.to_owned(), message: e.to_string() })?,
        );
        let conn = Self {
            name: name.to_owned(),
            transport,
            masker: config.masking.as_ref().map(DataMasker::new),
        };
        conn.handshake().await?;
        Ok(conn)
    }

    /// Wrap an externally-provided transport (tests, in-process servers).
    pub fn with_transport(
        name: &str,
        transport: Box<dyn McpTransport>,
        masking: Option<&tarsy_domain::config::MaskingConfig>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            transport,
            masker: masking.map(DataMasker::new),
        }
    }

    async fn handshake(&self) -> Result<()> {
        let params = serde_json::to_value(protocol::initialize_params()).map_err(Error::Json)?;
        let resp = self
            .transport
            .send_request("initialize", Some(params))
            .await
            .map_err(|e| self.server_err(e.to_string()))?;
        if resp.is_error() {
            return Err(self.server_err(format!("initialize failed: {}", resp.error.unwrap())));
        }
        self.transport
            .send_notification("notifications/initialized")
            .await
            .map_err(|e| self.server_err(e.to_string()))?;
        tracing::debug!(server = %self.name, "tool server handshake complete");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// `tools/list` on this server.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let resp = self
            .transport
            .send_request("tools/list", None)
            .await
            .map_err(|e| self.server_err(e.to_string()))?;
        let value = resp.into_result().map_err(|e| self.server_err(e.to_string()))?;
        let parsed: ToolsListResult =
            serde_json::from_value(value).map_err(|e| self.server_err(format!("bad tools/list result: {e}")))?;
        Ok(parsed.tools)
    }

    /// `tools/call` on this server, masking applied when configured.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        if !self.transport.is_alive() {
            return Err(self.server_err("server is down".into()));
        }
        let params = serde_json::json!({ "name": tool, "arguments": arguments });
        let resp = self
            .transport
            .send_request("tools/call", Some(params))
            .await
            .map_err(|e| self.server_err(e.to_string()))?;
        let value = resp.into_result().map_err(|e| self.server_err(e.to_string()))?;
        let parsed: ToolCallResult =
            serde_json::from_value(value).map_err(|e| self.server_err(format!("bad tools/call result: {e}")))?;
        if parsed.is_error {
            return Err(self.server_err(parsed.error_text()));
        }

        let raw = parsed.to_value();
        Ok(match &self.masker {
            Some(masker) => masker.apply(raw),
            None => raw,
        })
    }

    pub async fn shutdown(&self) {
        tracing::info!(server = %self.name, "shutting down tool server");
        self.transport.shutdown().await;
    }

    fn server_err(&self, message: String) -> Error {
        Error::ToolServer { server: self.name.clone(), message }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// McpServerRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct McpServerRegistry {
    servers: HashMap<String, Arc<McpServerConnection>>,
}

impl McpServerRegistry {
    pub fn empty() -> Self {
        Self { servers: HashMap::new() }
    }

    /// Initialize from config: spawn every enabled server and handshake.
    /// Servers that fail to initialize are logged and skipped.
    pub async fn from_config(configs: &HashMap<String, McpServerConfig>) -> Self {
        let mut servers = HashMap::new();
        for (name, config) in configs {
            if !config.enabled {
                tracing::info!(server = %name, "tool server disabled, skipping");
                continue;
            }
            tracing::info!(server = %name, command = %config.command, "initializing tool server");
            match McpServerConnection::initialize(name, config).await {
                Ok(conn) => {
                    servers.insert(name.clone(), Arc::new(conn));
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "failed to initialize tool server, skipping");
                }
            }
        }
        if !servers.is_empty() {
            tracing::info!(count = servers.len(), "tool server registry ready");
        }
        Self { servers }
    }

    /// Insert a pre-built connection (tests, in-process servers).
    pub fn insert(&mut self, conn: McpServerConnection) {
        self.servers.insert(conn.name.clone(), Arc::new(conn));
    }

    pub fn get(&self, name: &str) -> Option<Arc<McpServerConnection>> {
        self.servers.get(name).cloned()
    }

    /// Resolve an agent's declared server list to live connections.
    /// Unknown or disabled servers are a configuration error.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<Arc<McpServerConnection>>> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    Error::Config(format!(
                        "tool server '{name}' is not configured or failed to start (known: {})",
                        self.known_servers().join(", ")
                    ))
                })
            })
            .collect()
    }

    pub fn known_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.servers.values().map(|s| s.shutdown()).collect();
        futures_util::future::join_all(futs).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
