//! Iteration controllers — the per-stage reasoning loops.
//!
//! One controller per [`IterationStrategy`], selected purely from chain
//! config at stage construction. Controllers depend only on the LLM
//! manager, the [`ToolExecutor`] capability, and a [`StageContext`] value.

pub mod final_analysis;
pub mod native_thinking;
pub mod react;
pub mod react_stage;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tarsy_domain::chain::IterationStrategy;
use tarsy_domain::context::StageContext;
use tarsy_domain::error::{Error, Result};
use tarsy_llm::LlmManager;

use crate::executor::ToolExecutor;

/// Per-stage loop limits.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub max_iterations: u32,
    pub iteration_timeout: Duration,
}

/// What a finished loop hands back to the agent.
#[derive(Debug, Clone)]
pub struct ControllerOutcome {
    pub analysis: String,
    pub iterations: u32,
}

#[async_trait]
pub trait IterationController: Send + Sync {
    /// Whether tool discovery must run before this controller starts.
    fn needs_tools(&self) -> bool;

    /// Drive the stage to a textual analysis.
    async fn execute(
        &self,
        ctx: &StageContext<'_>,
        tools: &dyn ToolExecutor,
    ) -> Result<ControllerOutcome>;
}

impl std::fmt::Debug for dyn IterationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn IterationController")
    }
}

/// Build the controller for a strategy.
///
/// Native thinking requires a provider with structured function calling and
/// a reasoning-level control; anything else is a configuration error caught
/// at stage construction.
pub fn build_controller(
    strategy: IterationStrategy,
    llm: Arc<LlmManager>,
    settings: ControllerSettings,
) -> Result<Box<dyn IterationController>> {
    match strategy {
        IterationStrategy::React => Ok(Box::new(react::ReactController::new(llm, settings))),
        IterationStrategy::ReactStage => {
            Ok(Box::new(react_stage::ReactStageController::new(llm, settings)))
        }
        IterationStrategy::ReactFinalAnalysis => {
            Ok(Box::new(final_analysis::FinalAnalysisController::new(llm, settings)))
        }
        IterationStrategy::NativeThinking => {
            let supports = llm
                .default_client()
                .map(|c| c.supports_native_thinking())
                .unwrap_or(false);
            if !supports {
                return Err(Error::Config(
                    "native_thinking strategy requires a provider with native function calling \
                     and a reasoning-level control"
                        .into(),
                ));
            }
            Ok(Box::new(native_thinking::NativeThinkingController::new(llm, settings)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarsy_hooks::HookManager;
    use tarsy_llm::{LlmClient, MockLlmClient};

    #[test]
    fn all_strategies_build_with_capable_provider() {
        let hooks = Arc::new(HookManager::new());
        let llm = Arc::new(LlmManager::with_providers(
            vec![("mock", Arc::new(MockLlmClient::with_texts(&[])) as Arc<dyn LlmClient>)],
            "mock",
            hooks,
        ));
        let settings = ControllerSettings {
            max_iterations: 10,
            iteration_timeout: Duration::from_secs(300),
        };
        for strategy in [
            IterationStrategy::React,
            IterationStrategy::ReactStage,
            IterationStrategy::ReactFinalAnalysis,
            IterationStrategy::NativeThinking,
        ] {
            let controller = build_controller(strategy, llm.clone(), settings).unwrap();
            let needs = controller.needs_tools();
            assert_eq!(needs, strategy != IterationStrategy::ReactFinalAnalysis);
        }
    }

    #[test]
    fn native_thinking_needs_a_provider() {
        let hooks = Arc::new(HookManager::new());
        let llm = Arc::new(LlmManager::with_providers(vec![], "mock", hooks));
        let settings = ControllerSettings {
            max_iterations: 10,
            iteration_timeout: Duration::from_secs(300),
        };
        let err = build_controller(IterationStrategy::NativeThinking, llm, settings).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
