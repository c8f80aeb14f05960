//! Provider-agnostic LLM conversation types.
//!
//! Controllers build an [`LlmConversation`], hand it to the LLM manager, and
//! get back an updated conversation plus content / tool-call intents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: MessageRole,
    pub content: String,
}

impl LlmMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }
}

/// The running conversation for one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConversation {
    pub messages: Vec<LlmMessage>,
}

impl LlmConversation {
    pub fn new(messages: Vec<LlmMessage>) -> Self {
        Self { messages }
    }

    /// Append a tool observation as a user turn.
    pub fn append_observation(&mut self, text: impl Into<String>) {
        self.messages.push(LlmMessage::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(LlmMessage::assistant(text));
    }

    /// Content of the most recent assistant message, if any.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

/// A structured tool-call intent returned by a native-function-calling model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallIntent {
    pub server: String,
    pub tool: String,
    pub parameters: Value,
}

/// Reasoning-depth control for native-thinking providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_appends_user_turn() {
        let mut conv = LlmConversation::new(vec![LlmMessage::system("sys")]);
        conv.append_observation("Observation: Terminating");
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].role, MessageRole::User);
    }

    #[test]
    fn last_assistant_content_finds_most_recent() {
        let mut conv = LlmConversation::default();
        conv.append_assistant("first");
        conv.append_observation("obs");
        conv.append_assistant("second");
        assert_eq!(conv.last_assistant_content(), Some("second"));
    }

    #[test]
    fn last_assistant_content_none_when_empty() {
        assert!(LlmConversation::default().last_assistant_content().is_none());
    }
}
