//! LLM manager: provider resolution plus hook-wrapped generation.
//!
//! Every `generate` call is bracketed by `llm.pre` / `llm.post` (or
//! `llm.error`) events carrying the full request and response JSON, timing,
//! and normalized token usage — that is what the timeline store and the
//! dashboard broadcaster consume.

use std::collections::HashMap;
use std::sync::Arc;

use tarsy_domain::config::LlmConfig;
use tarsy_domain::error::{Error, Result};
use tarsy_domain::model::{now_us, LlmInteraction};
use tarsy_hooks::{events, HookManager, HookPayload};

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai_compat::OpenAiCompatClient;

pub struct LlmManager {
    providers: HashMap<String, Arc<dyn LlmClient>>,
    default_provider: String,
    hooks: Arc<HookManager>,
}

impl LlmManager {
    /// Build from config. Providers whose API key env is missing are logged
    /// and skipped; availability is checked at preflight, not here.
    pub fn from_config(config: &LlmConfig, hooks: Arc<HookManager>) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmClient>> = HashMap::new();
        for (name, provider_config) in &config.providers {
            match OpenAiCompatClient::from_config(name, provider_config) {
                Ok(client) => {
                    tracing::info!(provider = %name, model = %provider_config.model, "LLM provider ready");
                    providers.insert(name.clone(), Arc::new(client));
                }
                Err(e) => {
                    tracing::warn!(provider = %name, error = %e, "skipping LLM provider");
                }
            }
        }
        Self {
            providers,
            default_provider: config.default_provider.clone(),
            hooks,
        }
    }

    /// Manager over explicit clients (tests).
    pub fn with_providers(
        providers: Vec<(&str, Arc<dyn LlmClient>)>,
        default_provider: &str,
        hooks: Arc<HookManager>,
    ) -> Self {
        Self {
            providers: providers.into_iter().map(|(n, c)| (n.to_owned(), c)).collect(),
            default_provider: default_provider.to_owned(),
            hooks,
        }
    }

    pub fn is_available(&self) -> bool {
        self.providers.contains_key(&self.default_provider) || !self.providers.is_empty()
    }

    pub fn available_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// The default client, falling back to any configured provider.
    pub fn default_client(&self) -> Option<Arc<dyn LlmClient>> {
        self.providers
            .get(&self.default_provider)
            .or_else(|| {
                let mut names: Vec<&String> = self.providers.keys().collect();
                names.sort();
                names.first().and_then(|n| self.providers.get(*n))
            })
            .cloned()
    }

    /// Hook-wrapped generation against the default provider.
    pub async fn generate(
        &self,
        request: &LlmRequest,
        session_id: &str,
        stage_execution_id: Option<&str>,
        step_description: &str,
    ) -> Result<LlmResponse> {
        let client = self.default_client().ok_or_else(|| Error::Llm {
            provider: self.default_provider.clone(),
            message: "no LLM providers are available".into(),
        })?;

        let mut interaction = LlmInteraction::new(session_id, stage_execution_id, client.model_name());
        interaction.step_description = step_description.to_owned();
        interaction.request_json = serde_json::to_value(request).unwrap_or(serde_json::Value::Null);
        let started = now_us();

        self.hooks
            .trigger(events::LLM_PRE, HookPayload::Llm(interaction.clone()))
            .await;

        let result = client.generate(request).await;
        interaction.duration_ms = (now_us() - started) / 1000;

        match result {
            Ok(response) => {
                interaction.success = true;
                interaction.response_json = Some(serde_json::json!({
                    "content": response.content,
                    "thinking_content": response.thinking_content,
                }));
                if !response.tool_calls.is_empty() {
                    interaction.tool_calls = serde_json::to_value(&response.tool_calls).ok();
                }
                interaction.token_usage = response.token_usage;
                self.hooks
                    .trigger(events::LLM_POST, HookPayload::Llm(interaction))
                    .await;
                Ok(response)
            }
            Err(e) => {
                interaction.error_message = Some(e.to_string());
                self.hooks
                    .trigger(events::LLM_ERROR, HookPayload::Llm(interaction))
                    .await;
                Err(e)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
