//! OpenAI-compatible chat completions client (non-streaming).
//!
//! Works against any endpoint speaking the `/chat/completions` shape. Tool
//! specs are bound as function definitions; function names encode the
//! `server.tool` pair as `server__tool` because the wire format rejects dots.

use async_trait::async_trait;
use serde_json::{json, Value};

use tarsy_domain::config::LlmProviderConfig;
use tarsy_domain::error::{Error, Result};
use tarsy_domain::llm::{LlmConversation, MessageRole, ToolCallIntent};
use tarsy_domain::model::TokenUsage;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

pub struct OpenAiCompatClient {
    provider_name: String,
    api_base: String,
    api_key: String,
    model: String,
    native_thinking: bool,
    http: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Build from provider config; reads the API key from the configured
    /// environment variable.
    pub fn from_config(provider_name: &str, config: &LlmProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            Error::Config(format!(
                "provider '{provider_name}': environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Ok(Self {
            provider_name: provider_name.to_owned(),
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            api_key,
            model: config.model.clone(),
            native_thinking: config.native_thinking,
            http: reqwest::Client::new(),
        })
    }

    fn build_body(&self, request: &LlmRequest) -> Value {
        let messages: Vec<Value> = request
            .conversation
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        MessageRole::System => "system",
                        MessageRole::User => "user",
                        MessageRole::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": encode_function_name(&t.server, &t.name),
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        if let Some(level) = request.thinking_level {
            body["reasoning_effort"] = serde_json::to_value(level).unwrap_or(Value::Null);
        }
        body
    }

    fn parse_response(&self, request: &LlmRequest, body: &Value) -> Result<LlmResponse> {
        let message = body
            .pointer("/choices/0/message")
            .ok_or_else(|| self.provider_err("response has no choices"))?;

        let content = message
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned();

        let tool_calls = message
            .get("tool_calls")
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| {
                        let name = call.pointer("/function/name")?.as_str()?;
                        let (server, tool) = decode_function_name(name)?;
                        let raw_args = call.pointer("/function/arguments")?.as_str().unwrap_or("{}");
                        let parameters =
                            serde_json::from_str(raw_args).unwrap_or(Value::Object(Default::default()));
                        Some(ToolCallIntent { server, tool, parameters })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let token_usage = body.get("usage").map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            completion_tokens: u.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(Value::as_u64).unwrap_or(0) as u32,
        });

        let mut conversation = request.conversation.clone();
        conversation.append_assistant(content.clone());

        Ok(LlmResponse {
            content,
            tool_calls,
            thought_signature: message
                .get("thought_signature")
                .and_then(Value::as_str)
                .map(str::to_owned),
            thinking_content: message
                .get("reasoning_content")
                .and_then(Value::as_str)
                .map(str::to_owned),
            conversation,
            token_usage,
        })
    }

    fn provider_err(&self, message: impl Into<String>) -> Error {
        Error::Llm { provider: self.provider_name.clone(), message: message.into() }
    }
}

fn encode_function_name(server: &str, tool: &str) -> String {
    format!("{server}__{tool}")
}

fn decode_function_name(name: &str) -> Option<(String, String)> {
    name.split_once("__").map(|(s, t)| (s.to_owned(), t.to_owned()))
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn supports_native_thinking(&self) -> bool {
        self.native_thinking
    }

    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_body(request);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.provider_err(e.to_string()))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| self.provider_err(format!("invalid response body: {e}")))?;

        if !status.is_success() {
            let detail = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("request failed");
            return Err(self.provider_err(format!("HTTP {status}: {detail}")));
        }

        self.parse_response(request, &payload)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
