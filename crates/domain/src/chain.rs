//! Chain definitions: ordered stages pinned to alert types.

use serde::{Deserialize, Serialize};

/// Reasoning loop selection for one stage. Purely data-driven from chain
/// config; dispatched at stage construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStrategy {
    React,
    ReactStage,
    ReactFinalAnalysis,
    NativeThinking,
}

impl IterationStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::React => "react",
            Self::ReactStage => "react_stage",
            Self::ReactFinalAnalysis => "react_final_analysis",
            Self::NativeThinking => "native_thinking",
        }
    }
}

/// One execution unit within a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStage {
    pub name: String,
    /// Agent class identifier or configured agent name.
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_strategy: Option<IterationStrategy>,
}

/// Ordered list of stages claiming a set of alert types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub chain_id: String,
    pub alert_types: Vec<String>,
    pub stages: Vec<ChainStage>,
}

impl ChainDefinition {
    /// Snapshot for persistence on the session row.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
