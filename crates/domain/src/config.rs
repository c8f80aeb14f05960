//! Service configuration.
//!
//! The service config is TOML (`tarsy.toml`); the agent/chain config is a
//! separate YAML file referenced from it, contributing configured agents,
//! tool servers, and chains on top of the built-ins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::chain::{ChainStage, IterationStrategy};
use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    /// Validate the configuration, returning all issues found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.processing.max_concurrent_alerts == 0 {
            issues.push(ConfigIssue::error("processing.max_concurrent_alerts must be >= 1"));
        }
        if self.processing.max_total_iterations == 0 {
            issues.push(ConfigIssue::error("processing.max_total_iterations must be >= 1"));
        }
        if self.processing.alert_processing_timeout_secs < self.processing.llm_iteration_timeout_secs {
            issues.push(ConfigIssue::warning(
                "processing.alert_processing_timeout_secs is shorter than one LLM iteration timeout",
            ));
        }
        if self.history.enabled && self.history.database_url.is_empty() {
            issues.push(ConfigIssue::error("history.database_url must be set when history is enabled"));
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue::warning("no LLM providers configured"));
        } else if !self.llm.providers.contains_key(&self.llm.default_provider) {
            issues.push(ConfigIssue::error(format!(
                "llm.default_provider '{}' is not a configured provider",
                self.llm.default_provider
            )));
        }
        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Error, message: message.into() }
    }
    fn warning(message: impl Into<String>) -> Self {
        Self { severity: ConfigSeverity::Warning, message: message.into() }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_8000")]
    pub port: u16,
    #[serde(default = "d_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: 8000,
            cors_origins: d_cors_origins(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Processing limits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Process-wide cap on concurrently processing alerts.
    #[serde(default = "d_5u")]
    pub max_concurrent_alerts: usize,
    /// Per-LLM-iteration wall clock bound.
    #[serde(default = "d_300")]
    pub llm_iteration_timeout_secs: u64,
    /// Per-alert wall clock bound over the whole stage loop.
    #[serde(default = "d_600")]
    pub alert_processing_timeout_secs: u64,
    /// Default per-stage iteration cap (agents may override).
    #[serde(default = "d_10")]
    pub max_total_iterations: u32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_alerts: 5,
            llm_iteration_timeout_secs: 300,
            alert_processing_timeout_secs: 600,
            max_total_iterations: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// SQLite database path. `":memory:"` is accepted for tests.
    #[serde(default = "d_db_url")]
    pub database_url: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { enabled: true, database_url: d_db_url() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default = "d_default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, LlmProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub api_base: String,
    /// Environment variable holding the API key (never the key itself).
    pub api_key_env: String,
    pub model: String,
    /// Whether the provider supports structured function calling plus a
    /// reasoning-level control (required by the native-thinking strategy).
    #[serde(default)]
    pub native_thinking: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent config file reference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentsConfig {
    /// Path to the YAML agent/chain config. Optional; built-ins apply anyway.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// YAML agent/chain config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parsed agent/chain config file: `agents{}`, `mcp_servers{}`, `chains{}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentConfigFile {
    #[serde(default)]
    pub agents: HashMap<String, ConfiguredAgent>,
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    #[serde(default)]
    pub chains: HashMap<String, ConfiguredChain>,
}

impl AgentConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        serde_yaml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

/// A user-defined agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredAgent {
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub custom_instructions: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub iteration_strategy: Option<IterationStrategy>,
}

/// A user-defined chain. The map key is the chain id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredChain {
    pub alert_types: Vec<String>,
    pub stages: Vec<ChainStage>,
}

/// One configured tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub masking: Option<MaskingConfig>,
}

/// Output masking applied to tool results before they reach the agent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaskingConfig {
    /// JSON keys whose values are replaced wholesale.
    #[serde(default)]
    pub masked_fields: Vec<String>,
    /// Regex patterns replaced inside string values.
    #[serde(default)]
    pub mask_patterns: Vec<String>,
}

// ── serde default helpers ──────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_8000() -> u16 {
    8000
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn d_5u() -> usize {
    5
}
fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_10() -> u32 {
    10
}
fn d_true() -> bool {
    true
}
fn d_db_url() -> String {
    "tarsy.db".into()
}
fn d_default_provider() -> String {
    "openai".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.processing.max_concurrent_alerts, 5);
        assert_eq!(cfg.processing.llm_iteration_timeout_secs, 300);
        assert_eq!(cfg.processing.alert_processing_timeout_secs, 600);
        assert!(cfg.history.enabled);
    }

    #[test]
    fn validate_flags_zero_concurrency() {
        let mut cfg = Config::default();
        cfg.processing.max_concurrent_alerts = 0;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_flags_unknown_default_provider() {
        let mut cfg = Config::default();
        cfg.llm.default_provider = "openai".into();
        cfg.llm.providers.insert(
            "anthropic".into(),
            LlmProviderConfig {
                api_base: "https://api.anthropic.com".into(),
                api_key_env: "ANTHROPIC_API_KEY".into(),
                model: "claude".into(),
                native_thinking: false,
            },
        );
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("default_provider")));
    }

    #[test]
    fn agent_config_yaml_roundtrip() {
        let raw = r#"
agents:
  SecurityAgent:
    mcp_servers: ["kubernetes-server"]
    custom_instructions: "Focus on RBAC."
    iteration_strategy: react_stage
mcp_servers:
  kubernetes-server:
    command: "npx"
    args: ["-y", "kubernetes-mcp-server"]
    masking:
      masked_fields: ["token"]
      mask_patterns: ["(?i)secret\\S*"]
chains:
  security-chain:
    alert_types: ["security"]
    stages:
      - name: triage
        agent: SecurityAgent
"#;
        let cfg: AgentConfigFile = serde_yaml::from_str(raw).unwrap();
        assert_eq!(cfg.agents.len(), 1);
        let agent = &cfg.agents["SecurityAgent"];
        assert_eq!(agent.iteration_strategy, Some(IterationStrategy::ReactStage));
        assert!(cfg.mcp_servers["kubernetes-server"].enabled);
        assert_eq!(
            cfg.mcp_servers["kubernetes-server"].masking.as_ref().unwrap().masked_fields,
            vec!["token"]
        );
        assert_eq!(cfg.chains["security-chain"].stages[0].name, "triage");
    }

    #[test]
    fn server_config_defaults_to_empty_env() {
        let raw = r#"{ "command": "echo" }"#;
        let cfg: McpServerConfig = serde_json::from_str(raw).unwrap();
        assert!(cfg.enabled);
        assert!(cfg.env.is_empty());
        assert!(cfg.masking.is_none());
    }
}
