//! Native thinking: structured function calling instead of text parsing.
//!
//! The model is called with the stage's tools bound as native functions, a
//! high reasoning level, and the previous thought signature for continuity.
//! Tool calls execute sequentially in the model's declared order so the
//! observation order always matches the tool-call list.

use std::sync::Arc;

use async_trait::async_trait;

use tarsy_domain::context::{StageContext, ToolRequest};
use tarsy_domain::error::Result;
use tarsy_domain::llm::{LlmConversation, LlmMessage, ThinkingLevel};
use tarsy_llm::{LlmManager, LlmRequest};

use crate::executor::ToolExecutor;
use crate::parser;
use crate::prompt;

use super::{ControllerOutcome, ControllerSettings, IterationController};

pub struct NativeThinkingController {
    llm: Arc<LlmManager>,
    settings: ControllerSettings,
}

impl NativeThinkingController {
    pub fn new(llm: Arc<LlmManager>, settings: ControllerSettings) -> Self {
        Self { llm, settings }
    }
}

#[async_trait]
impl IterationController for NativeThinkingController {
    fn needs_tools(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &StageContext<'_>,
        tools: &dyn ToolExecutor,
    ) -> Result<ControllerOutcome> {
        let mut conversation = LlmConversation::new(vec![
            LlmMessage::system(prompt::native_thinking_system_message(ctx.custom_instructions)),
            LlmMessage::user(prompt::build_native_thinking_prompt(ctx)),
        ]);
        let mut thought_signature: Option<String> = None;
        let timeout_secs = self.settings.iteration_timeout.as_secs();

        tracing::info!(
            tools = ctx.available_tools.tools.len(),
            stage = ctx.stage_name(),
            "starting native thinking loop"
        );

        for iteration in 1..=self.settings.max_iterations {
            let request = LlmRequest {
                conversation: conversation.clone(),
                tools: ctx.available_tools.tools.clone(),
                thinking_level: Some(ThinkingLevel::High),
                thought_signature: thought_signature.clone(),
            };
            let step = format!("native thinking iteration {iteration} ({})", ctx.stage_name());

            let call = self.llm.generate(&request, ctx.session_id(), Some(ctx.stage_execution_id), &step);
            let response = match tokio::time::timeout(self.settings.iteration_timeout, call).await {
                Err(_) => {
                    conversation.append_observation(format!(
                        "Error: iteration {iteration} exceeded {timeout_secs}s timeout"
                    ));
                    continue;
                }
                Ok(Err(e)) => {
                    conversation.append_observation(format!("Error: {e}"));
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            thought_signature = response.thought_signature.clone();
            conversation = response.conversation.clone();

            if response.is_final() {
                let content = response.content.trim().to_owned();
                let analysis = if content.is_empty() {
                    "No analysis result generated".to_owned()
                } else {
                    content
                };
                return Ok(ControllerOutcome { analysis, iterations: iteration });
            }

            // Execute every declared tool call, in order, sequentially.
            for intent in &response.tool_calls {
                let request = ToolRequest {
                    server: intent.server.clone(),
                    tool: intent.tool.clone(),
                    parameters: intent.parameters.clone(),
                    reason: format!("native tool call in iteration {iteration}"),
                };
                let outcomes = tools.execute_tools(&[request]).await;
                match outcomes.first() {
                    Some(outcome) if outcome.is_success() => {
                        conversation
                            .append_observation(format!("Tool Result: {}", parser::format_observation(&outcomes)));
                    }
                    Some(outcome) => {
                        conversation.append_observation(format!(
                            "Tool Error: {}.{}: {}",
                            outcome.server,
                            outcome.tool,
                            outcome.error.as_deref().unwrap_or("unknown error")
                        ));
                    }
                    None => {
                        conversation.append_observation("Tool Error: no outcome returned".to_owned());
                    }
                }
            }
        }

        tracing::warn!(
            max_iterations = self.settings.max_iterations,
            "native thinking reached iteration cap without a final answer"
        );
        let analysis = conversation
            .last_assistant_content()
            .filter(|c| !c.trim().is_empty())
            .map(|c| c.trim().to_owned())
            .unwrap_or_else(|| "No analysis result generated".to_owned());
        Ok(ControllerOutcome { analysis, iterations: self.settings.max_iterations })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
