//! The client trait and its request/response types.

use async_trait::async_trait;
use serde::Serialize;

use tarsy_domain::context::ToolSpec;
use tarsy_domain::error::Result;
use tarsy_domain::llm::{LlmConversation, ThinkingLevel, ToolCallIntent};
use tarsy_domain::model::TokenUsage;

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmRequest {
    pub conversation: LlmConversation,
    /// Tools bound as native functions. Empty = text mode.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    /// Reasoning-depth control for native-thinking providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<ThinkingLevel>,
    /// Opaque signature threading reasoning continuity between iterations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl LlmRequest {
    pub fn text(conversation: LlmConversation) -> Self {
        Self { conversation, ..Default::default() }
    }
}

/// A provider-agnostic generation response.
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub content: String,
    /// Structured tool-call intents (native-thinking mode only).
    pub tool_calls: Vec<ToolCallIntent>,
    pub thought_signature: Option<String>,
    /// Model reasoning captured for audit; never replayed as a user turn.
    pub thinking_content: Option<String>,
    /// The conversation including the assistant turn just produced.
    pub conversation: LlmConversation,
    pub token_usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// Final iff the model requested no tool calls.
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// The single interface between the engine and any model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Whether this provider supports structured function calling plus a
    /// reasoning-level control (required by the native-thinking strategy).
    fn supports_native_thinking(&self) -> bool;

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;
}
