//! Classic ReAct: Thought → Action → Observation, one tool per iteration,
//! until the model produces a Final Answer or the iteration cap is hit.

use std::sync::Arc;

use async_trait::async_trait;

use tarsy_domain::context::StageContext;
use tarsy_domain::error::Result;
use tarsy_domain::llm::{LlmConversation, LlmMessage};
use tarsy_llm::{LlmManager, LlmRequest};

use crate::executor::ToolExecutor;
use crate::parser;
use crate::prompt;

use super::{ControllerOutcome, ControllerSettings, IterationController};

/// Result of one full ReAct loop, shared with the stage-aware variant.
pub(crate) struct ReactLoopOutcome {
    pub transcript: String,
    pub final_answer: Option<String>,
    pub iterations: u32,
}

/// Run the ReAct state machine with a caller-supplied prompt builder.
///
/// Timeouts and LLM failures become error observations and the loop keeps
/// going; only running out of iterations ends it without a final answer.
pub(crate) async fn run_react_loop(
    llm: &LlmManager,
    settings: ControllerSettings,
    ctx: &StageContext<'_>,
    tools: &dyn ToolExecutor,
    build_prompt: impl Fn(&StageContext<'_>, &[String]) -> String,
) -> ReactLoopOutcome {
    let system = prompt::compose_system_message(ctx.custom_instructions);
    let mut history: Vec<String> = Vec::new();
    let timeout_secs = settings.iteration_timeout.as_secs();

    for iteration in 1..=settings.max_iterations {
        let user_prompt = build_prompt(ctx, &history);
        let request = LlmRequest::text(LlmConversation::new(vec![
            LlmMessage::system(system.clone()),
            LlmMessage::user(user_prompt),
        ]));
        let step = format!("ReAct iteration {iteration} ({})", ctx.stage_name());

        let call = llm.generate(&request, ctx.session_id(), Some(ctx.stage_execution_id), &step);
        let response = match tokio::time::timeout(settings.iteration_timeout, call).await {
            Err(_) => {
                tracing::warn!(iteration, timeout_secs, "LLM iteration timed out");
                history.push(format!(
                    "Observation: Error: iteration {iteration} exceeded {timeout_secs}s timeout"
                ));
                continue;
            }
            Ok(Err(e)) => {
                tracing::warn!(iteration, error = %e, "LLM iteration failed");
                history.push(format!("Observation: Error: {e}"));
                continue;
            }
            Ok(Ok(response)) => response,
        };

        let parsed = parser::parse_react_response(&response.content);

        if let Some(thought) = &parsed.thought {
            history.push(format!("Thought: {thought}"));
        }

        if let Some(answer) = parsed.final_answer {
            history.push(format!("Final Answer: {answer}"));
            return ReactLoopOutcome {
                transcript: history.join("\n"),
                final_answer: Some(answer),
                iterations: iteration,
            };
        }

        match (&parsed.action, &parsed.action_input) {
            (Some(action), input) => {
                let input = input.clone().unwrap_or_default();
                history.push(format!("Action: {action}"));
                history.push(format!("Action Input: {input}"));
                match parser::action_to_tool_request(action, &input) {
                    Ok(tool_request) => {
                        let outcomes = tools.execute_tools(&[tool_request]).await;
                        let observation = parser::format_observation(&outcomes);
                        history.push(format!("Observation: {observation}"));
                    }
                    Err(e) => {
                        history.push(format!("Observation: Error: {e}"));
                    }
                }
            }
            (None, _) => {
                // Unparseable step: nudge the model back into the grammar.
                history.push(
                    "Observation: Error: no actionable step found; respond with \
                     Thought/Action/Action Input or a Final Answer."
                        .to_owned(),
                );
            }
        }
    }

    ReactLoopOutcome {
        transcript: history.join("\n"),
        final_answer: None,
        iterations: settings.max_iterations,
    }
}

/// Extract the last Thought as the best-effort partial analysis.
pub(crate) fn last_thought_extractor(lines: &[&str]) -> Option<String> {
    lines
        .iter()
        .rev()
        .find_map(|l| l.strip_prefix("Thought:").map(|t| t.trim().to_owned()))
        .filter(|t| !t.is_empty())
}

pub struct ReactController {
    llm: Arc<LlmManager>,
    settings: ControllerSettings,
}

impl ReactController {
    pub fn new(llm: Arc<LlmManager>, settings: ControllerSettings) -> Self {
        Self { llm, settings }
    }
}

#[async_trait]
impl IterationController for ReactController {
    fn needs_tools(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        ctx: &StageContext<'_>,
        tools: &dyn ToolExecutor,
    ) -> Result<ControllerOutcome> {
        let outcome =
            run_react_loop(&self.llm, self.settings, ctx, tools, prompt::build_react_prompt).await;

        let analysis = match outcome.final_answer {
            Some(answer) => answer,
            None => {
                let partial = parser::extract_final_analysis(
                    &outcome.transcript,
                    &[],
                    &[],
                    last_thought_extractor,
                    "No analysis generated",
                );
                format!(
                    "Maximum iterations ({}) reached without a final answer.\n\nPartial analysis: {partial}",
                    self.settings.max_iterations
                )
            }
        };

        Ok(ControllerOutcome { analysis, iterations: outcome.iterations })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
