//! Final analysis: one LLM call, no tools. The prompt carries everything
//! the earlier stages established; the response is the analysis, verbatim.

use std::sync::Arc;

use async_trait::async_trait;

use tarsy_domain::context::StageContext;
use tarsy_domain::error::{Error, Result};
use tarsy_domain::llm::{LlmConversation, LlmMessage};
use tarsy_llm::{LlmManager, LlmRequest};

use crate::executor::ToolExecutor;
use crate::prompt;

use super::{ControllerOutcome, ControllerSettings, IterationController};

pub struct FinalAnalysisController {
    llm: Arc<LlmManager>,
    settings: ControllerSettings,
}

impl FinalAnalysisController {
    pub fn new(llm: Arc<LlmManager>, settings: ControllerSettings) -> Self {
        Self { llm, settings }
    }
}

#[async_trait]
impl IterationController for FinalAnalysisController {
    fn needs_tools(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        ctx: &StageContext<'_>,
        _tools: &dyn ToolExecutor,
    ) -> Result<ControllerOutcome> {
        let request = LlmRequest::text(LlmConversation::new(vec![
            LlmMessage::system(prompt::compose_system_message(ctx.custom_instructions)),
            LlmMessage::user(prompt::build_final_analysis_prompt(ctx)),
        ]));

        let step = format!("final analysis ({})", ctx.stage_name());
        let call = self.llm.generate(&request, ctx.session_id(), Some(ctx.stage_execution_id), &step);
        let response = tokio::time::timeout(self.settings.iteration_timeout, call)
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "final analysis exceeded {}s",
                    self.settings.iteration_timeout.as_secs()
                ))
            })??;

        let analysis = response.content.trim().to_owned();
        let analysis = if analysis.is_empty() {
            "No final analysis generated".to_owned()
        } else {
            analysis
        };
        Ok(ControllerOutcome { analysis, iterations: 1 })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
