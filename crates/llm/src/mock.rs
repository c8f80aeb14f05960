//! Scripted client for tests: pops one scripted turn per `generate` call and
//! records every request it saw.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tarsy_domain::error::{Error, Result};
use tarsy_domain::llm::ToolCallIntent;
use tarsy_domain::model::TokenUsage;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

/// One scripted model turn.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Plain text response (ReAct modes parse it).
    Text(String),
    /// Structured tool calls plus optional thinking content (native mode).
    ToolCalls {
        calls: Vec<ToolCallIntent>,
        thinking: Option<String>,
        signature: Option<String>,
    },
    /// Fail this call with a provider error.
    Fail(String),
    /// Sleep long enough to trip iteration timeouts, then answer.
    Stall(Duration, String),
}

pub struct MockLlmClient {
    provider_name: String,
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<LlmRequest>>,
    native_thinking: bool,
}

impl MockLlmClient {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            provider_name: "mock".into(),
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            native_thinking: true,
        }
    }

    /// Convenience: script a sequence of plain text turns.
    pub fn with_texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| ScriptedTurn::Text(t.to_string())).collect())
    }

    /// Every request observed so far, in call order.
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn supports_native_thinking(&self) -> bool {
        self.native_thinking
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().push(request.clone());
        let turn = self.turns.lock().pop_front();

        let usage = Some(TokenUsage { prompt_tokens: 100, completion_tokens: 50, total_tokens: 150 });
        let mut conversation = request.conversation.clone();

        match turn {
            Some(ScriptedTurn::Text(content)) => {
                conversation.append_assistant(content.clone());
                Ok(LlmResponse {
                    content,
                    tool_calls: vec![],
                    thought_signature: None,
                    thinking_content: None,
                    conversation,
                    token_usage: usage,
                })
            }
            Some(ScriptedTurn::ToolCalls { calls, thinking, signature }) => {
                conversation.append_assistant(String::new());
                Ok(LlmResponse {
                    content: String::new(),
                    tool_calls: calls,
                    thought_signature: signature,
                    thinking_content: thinking,
                    conversation,
                    token_usage: usage,
                })
            }
            Some(ScriptedTurn::Fail(message)) => {
                Err(Error::Llm { provider: self.provider_name.clone(), message })
            }
            Some(ScriptedTurn::Stall(duration, content)) => {
                tokio::time::sleep(duration).await;
                conversation.append_assistant(content.clone());
                Ok(LlmResponse {
                    content,
                    tool_calls: vec![],
                    thought_signature: None,
                    thinking_content: None,
                    conversation,
                    token_usage: usage,
                })
            }
            None => Err(Error::Llm {
                provider: self.provider_name.clone(),
                message: "mock script exhausted".into(),
            }),
        }
    }
}
