//! Chain registry: alert type → chain definition.
//!
//! Built-in chains merge with user-configured ones at startup. Conflicts
//! (duplicate chain ids, or an alert type claimed twice) abort startup.

use std::collections::HashMap;

use tarsy_domain::chain::{ChainDefinition, ChainStage, IterationStrategy};
use tarsy_domain::config::ConfiguredChain;
use tarsy_domain::error::{Error, Result};

#[derive(Debug)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainDefinition>,
    /// alert_type → chain_id, built once.
    alert_type_index: HashMap<String, String>,
}

fn builtin_chains() -> Vec<ChainDefinition> {
    vec![ChainDefinition {
        chain_id: "kubernetes".into(),
        alert_types: vec!["kubernetes".into()],
        stages: vec![
            ChainStage {
                name: "data-collection".into(),
                agent: "KubernetesAgent".into(),
                iteration_strategy: Some(IterationStrategy::React),
            },
            ChainStage {
                name: "verification".into(),
                agent: "KubernetesAgent".into(),
                iteration_strategy: Some(IterationStrategy::ReactStage),
            },
            ChainStage {
                name: "analysis".into(),
                agent: "KubernetesAgent".into(),
                iteration_strategy: Some(IterationStrategy::ReactFinalAnalysis),
            },
        ],
    }]
}

impl ChainRegistry {
    /// Merge built-ins with configured chains and validate the result.
    pub fn new(configured: &HashMap<String, ConfiguredChain>, known_agents: &[String]) -> Result<Self> {
        let mut chains: HashMap<String, ChainDefinition> = HashMap::new();
        let mut alert_type_index: HashMap<String, String> = HashMap::new();

        let configured_defs = configured.iter().map(|(chain_id, c)| ChainDefinition {
            chain_id: chain_id.clone(),
            alert_types: c.alert_types.clone(),
            stages: c.stages.clone(),
        });

        for chain in builtin_chains().into_iter().chain(configured_defs) {
            if chains.contains_key(&chain.chain_id) {
                return Err(Error::Chain(format!("duplicate chain id '{}'", chain.chain_id)));
            }
            if chain.stages.is_empty() {
                return Err(Error::Chain(format!("chain '{}' has no stages", chain.chain_id)));
            }
            for stage in &chain.stages {
                if !known_agents.contains(&stage.agent) {
                    return Err(Error::Chain(format!(
                        "chain '{}' stage '{}' references unknown agent '{}'",
                        chain.chain_id, stage.name, stage.agent
                    )));
                }
            }
            for alert_type in &chain.alert_types {
                if let Some(existing) = alert_type_index.get(alert_type) {
                    return Err(Error::Chain(format!(
                        "alert type '{alert_type}' is claimed by both '{existing}' and '{}'",
                        chain.chain_id
                    )));
                }
                alert_type_index.insert(alert_type.clone(), chain.chain_id.clone());
            }
            chains.insert(chain.chain_id.clone(), chain);
        }

        tracing::info!(
            chains = chains.len(),
            alert_types = alert_type_index.len(),
            "chain registry ready"
        );
        Ok(Self { chains, alert_type_index })
    }

    /// The chain claiming an alert type, or an error enumerating known types.
    pub fn get_chain_for_alert_type(&self, alert_type: &str) -> Result<&ChainDefinition> {
        self.alert_type_index
            .get(alert_type)
            .and_then(|chain_id| self.chains.get(chain_id))
            .ok_or_else(|| {
                Error::Chain(format!(
                    "no chain handles alert type '{alert_type}' (known types: {})",
                    self.list_alert_types().join(", ")
                ))
            })
    }

    pub fn list_alert_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.alert_type_index.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn list_chain_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.chains.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
