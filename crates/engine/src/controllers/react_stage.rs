//! Stage-aware ReAct: same state machine as classic ReAct, but the prompt
//! carries a stage task block and the result is extracted through completion
//! and incomplete pattern lists when the model never says `Final Answer`.

use std::sync::Arc;

use async_trait::async_trait;

use tarsy_domain::context::StageContext;
use tarsy_domain::error::Result;
use tarsy_llm::LlmManager;

use crate::executor::ToolExecutor;
use crate::parser;
use crate::prompt;

use super::react::{last_thought_extractor, run_react_loop};
use super::{ControllerOutcome, ControllerSettings, IterationController};

const DEFAULT_COMPLETION_PATTERNS: &[&str] = &[
    "Stage Complete:",
    "Data collection complete",
    "Analysis complete",
    "Verification complete",
];

const DEFAULT_INCOMPLETE_PATTERNS: &[&str] = &[
    "Data collection in progress",
    "Analysis in progress",
    "Investigation ongoing",
];

pub struct ReactStageController {
    llm: Arc<LlmManager>,
    settings: ControllerSettings,
    completion_patterns: Vec<String>,
    incomplete_patterns: Vec<String>,
}

impl ReactStageController {
    pub fn new(llm: Arc<LlmManager>, settings: ControllerSettings) -> Self {
        Self {
            llm,
            settings,
            completion_patterns: DEFAULT_COMPLETION_PATTERNS.iter().map(|s| s.to_string()).collect(),
            incomplete_patterns: DEFAULT_INCOMPLETE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the pattern lists used for summary extraction.
    pub fn with_patterns(mut self, completion: Vec<String>, incomplete: Vec<String>) -> Self {
        self.completion_patterns = completion;
        self.incomplete_patterns = incomplete;
        self
    }
}

#[async_trait]
impl IterationController for ReactStageController {
    fn needs_tools(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &StageContext<'_>,
        tools: &dyn ToolExecutor,
    ) -> Result<ControllerOutcome> {
        let outcome =
            run_react_loop(&self.llm, self.settings, ctx, tools, prompt::build_stage_react_prompt).await;

        let completion: Vec<&str> = self.completion_patterns.iter().map(String::as_str).collect();
        let incomplete: Vec<&str> = self.incomplete_patterns.iter().map(String::as_str).collect();
        let analysis = parser::extract_final_analysis(
            &outcome.transcript,
            &completion,
            &incomplete,
            last_thought_extractor,
            "No analysis generated",
        );

        Ok(ControllerOutcome { analysis, iterations: outcome.iterations })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
