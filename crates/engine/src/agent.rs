//! Agents: composition of allowed tool servers, instructions, and an
//! iteration strategy. A fresh instance is created for every stage.
//!
//! The agent is also the [`ToolExecutor`] the controller sees: requests
//! targeting a server outside the declared allow-list are recorded as error
//! interactions and never reach the tool client.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tarsy_domain::chain::IterationStrategy;
use tarsy_domain::config::ConfiguredAgent;
use tarsy_domain::context::{
    AgentExecutionResult, AvailableTools, ChainContext, StageContext, ToolOutcome, ToolRequest,
};
use tarsy_domain::error::{Error, Result};
use tarsy_domain::model::{McpCommunicationType, McpInteraction};
use tarsy_hooks::{events, HookManager, HookPayload};
use tarsy_llm::LlmManager;
use tarsy_mcp::McpToolClient;

use crate::controllers::{build_controller, ControllerSettings, IterationController};
use crate::executor::ToolExecutor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Agent {
    name: String,
    mcp_servers: Vec<String>,
    custom_instructions: String,
    controller: Box<dyn IterationController>,
    mcp: Arc<McpToolClient>,
    hooks: Arc<HookManager>,
    /// Bound by the orchestrator before the stage runs; tags every
    /// interaction this agent produces.
    stage_execution_id: String,
    session_id: String,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Agent {
    /// Bind the agent to the stage execution it is about to run.
    pub fn bind_stage(&mut self, session_id: &str, stage_execution_id: &str) {
        self.session_id = session_id.to_owned();
        self.stage_execution_id = stage_execution_id.to_owned();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mcp_servers(&self) -> &[String] {
        &self.mcp_servers
    }

    /// Execute one stage against the chain context.
    ///
    /// Fatal problems (missing tool server, tool discovery failure, a
    /// controller error) surface as `Err` — the orchestrator records the
    /// stage as failed and the chain continues.
    pub async fn execute_stage(&self, chain: &ChainContext) -> Result<AgentExecutionResult> {
        // (i) Resolve the declared servers; configuration errors are fatal.
        self.mcp.registry().resolve(&self.mcp_servers)?;

        // (ii) Tool discovery, when the strategy needs it.
        let available_tools = if self.controller.needs_tools() {
            let mut tools = Vec::new();
            for server in &self.mcp_servers {
                let mut discovered = self
                    .mcp
                    .list_tools(&self.session_id, Some(&self.stage_execution_id), server)
                    .await?;
                tools.append(&mut discovered);
            }
            AvailableTools { tools }
        } else {
            AvailableTools::default()
        };

        // (iii) Run the reasoning loop.
        let ctx = StageContext {
            chain,
            available_tools: &available_tools,
            agent_name: &self.name,
            custom_instructions: &self.custom_instructions,
            mcp_servers: &self.mcp_servers,
            stage_execution_id: &self.stage_execution_id,
        };
        let outcome = self.controller.execute(&ctx, self).await?;

        // (iv) Wrap the result.
        Ok(AgentExecutionResult::completed(
            &self.name,
            Some(chain.current_stage_name.clone()),
            format!("## Analysis Result\n\n{}", outcome.analysis),
            outcome.analysis,
            outcome.iterations,
        ))
    }
}

#[async_trait]
impl ToolExecutor for Agent {
    async fn execute_tools(&self, requests: &[ToolRequest]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            if !self.mcp_servers.contains(&request.server) {
                outcomes.push(self.reject_disallowed(request).await);
                continue;
            }
            outcomes.push(
                self.mcp
                    .call_tool(
                        &self.session_id,
                        Some(&self.stage_execution_id),
                        &request.server,
                        &request.tool,
                        request.parameters.clone(),
                    )
                    .await,
            );
        }
        outcomes
    }
}

impl Agent {
    /// Record an allow-list violation as an error interaction without
    /// contacting the tool client.
    async fn reject_disallowed(&self, request: &ToolRequest) -> ToolOutcome {
        let message = format!(
            "Server '{}' is not allowed for agent {} (allowed: {})",
            request.server,
            self.name,
            self.mcp_servers.join(", ")
        );
        tracing::warn!(server = %request.server, agent = %self.name, "rejected tool call outside allow-list");

        let mut interaction = McpInteraction::new(
            &self.session_id,
            Some(&self.stage_execution_id),
            &request.server,
            McpCommunicationType::ToolCall,
        );
        interaction.tool_name = Some(request.tool.clone());
        interaction.tool_arguments = Some(request.parameters.clone());
        interaction.step_description = format!("rejected call to {}.{}", request.server, request.tool);
        interaction.error_message = Some(message.clone());
        self.hooks
            .trigger(events::MCP_ERROR, HookPayload::Mcp(interaction))
            .await;

        ToolOutcome::failure(&request.server, &request.tool, message)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blueprints + factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static description of an agent: what the factory stamps instances from.
#[derive(Debug, Clone)]
pub struct AgentBlueprint {
    pub mcp_servers: Vec<String>,
    pub custom_instructions: String,
    pub max_iterations: Option<u32>,
    pub default_strategy: Option<IterationStrategy>,
}

/// Built-in Kubernetes specialist.
fn kubernetes_agent_blueprint() -> AgentBlueprint {
    AgentBlueprint {
        mcp_servers: vec!["kubernetes-server".into()],
        custom_instructions: "For Kubernetes alerts, always check namespace status, finalizers, \
                              and recent events before proposing remediation. Never recommend \
                              destructive operations without calling out their blast radius."
            .into(),
        max_iterations: None,
        default_strategy: None,
    }
}

pub struct AgentFactory {
    llm: Arc<LlmManager>,
    mcp: Arc<McpToolClient>,
    hooks: Arc<HookManager>,
    blueprints: HashMap<String, AgentBlueprint>,
    settings: ControllerSettings,
}

impl AgentFactory {
    /// Built-in agents plus whatever the agent config file contributes.
    pub fn new(
        llm: Arc<LlmManager>,
        mcp: Arc<McpToolClient>,
        hooks: Arc<HookManager>,
        configured_agents: &HashMap<String, ConfiguredAgent>,
        settings: ControllerSettings,
    ) -> Self {
        let mut blueprints = HashMap::new();
        blueprints.insert("KubernetesAgent".to_owned(), kubernetes_agent_blueprint());
        for (name, configured) in configured_agents {
            blueprints.insert(
                name.clone(),
                AgentBlueprint {
                    mcp_servers: configured.mcp_servers.clone(),
                    custom_instructions: configured.custom_instructions.clone(),
                    max_iterations: configured.max_iterations,
                    default_strategy: configured.iteration_strategy,
                },
            );
        }
        tracing::info!(agents = blueprints.len(), "agent factory ready");
        Self { llm, mcp, hooks, blueprints, settings }
    }

    pub fn known_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blueprints.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stamp a fresh agent for one stage. The strategy resolves as: stage
    /// override, then the blueprint default, then classic ReAct.
    pub fn create_agent(
        &self,
        identifier: &str,
        strategy_override: Option<IterationStrategy>,
    ) -> Result<Agent> {
        let blueprint = self.blueprints.get(identifier).ok_or_else(|| {
            Error::Config(format!(
                "unknown agent '{identifier}' (known: {})",
                self.known_agents().join(", ")
            ))
        })?;

        let strategy = strategy_override
            .or(blueprint.default_strategy)
            .unwrap_or(IterationStrategy::React);
        let settings = ControllerSettings {
            max_iterations: blueprint.max_iterations.unwrap_or(self.settings.max_iterations),
            iteration_timeout: self.settings.iteration_timeout,
        };
        let controller = build_controller(strategy, self.llm.clone(), settings)?;

        Ok(Agent {
            name: identifier.to_owned(),
            mcp_servers: blueprint.mcp_servers.clone(),
            custom_instructions: blueprint.custom_instructions.clone(),
            controller,
            mcp: self.mcp.clone(),
            hooks: self.hooks.clone(),
            stage_execution_id: String::new(),
            session_id: String::new(),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use tarsy_hooks::EventHook;
    use tarsy_llm::mock::ScriptedTurn;
    use tarsy_llm::{LlmClient, MockLlmClient};
    use tarsy_mcp::registry::{McpServerConnection, McpServerRegistry};
    use tarsy_mcp::testing::ScriptedTransport;

    struct McpRecorder {
        seen: Mutex<Vec<(String, McpInteraction)>>,
    }

    #[async_trait]
    impl EventHook for McpRecorder {
        fn name(&self) -> &str {
            "mcp-recorder"
        }

        async fn execute(&self, event: &str, payload: &HookPayload) -> tarsy_domain::Result<()> {
            if let Some(interaction) = payload.as_mcp() {
                self.seen.lock().push((event.to_owned(), interaction.clone()));
            }
            Ok(())
        }
    }

    fn factory_with(turns: Vec<ScriptedTurn>) -> (AgentFactory, Arc<McpRecorder>) {
        let hooks = Arc::new(HookManager::new());
        let recorder = Arc::new(McpRecorder { seen: Mutex::new(Vec::new()) });
        hooks.register_many(&[events::MCP_PRE, events::MCP_POST, events::MCP_ERROR], recorder.clone());

        let transport = ScriptedTransport::new()
            .on("tools/list", json!({"tools": [{"name": "kubectl_get", "description": "Get resources"}]}))
            .on("tools/call", json!({"content": [{"type": "text", "text": "{\"phase\": \"Terminating\"}"}]}));
        let mut registry = McpServerRegistry::empty();
        registry.insert(McpServerConnection::with_transport("kubernetes-server", Box::new(transport), None));
        let mcp = Arc::new(McpToolClient::new(Arc::new(registry), hooks.clone()));

        let llm = Arc::new(LlmManager::with_providers(
            vec![("mock", Arc::new(MockLlmClient::new(turns)) as Arc<dyn LlmClient>)],
            "mock",
            Arc::new(HookManager::new()),
        ));
        let settings = ControllerSettings { max_iterations: 10, iteration_timeout: Duration::from_secs(300) };
        (AgentFactory::new(llm, mcp, hooks, &HashMap::new(), settings), recorder)
    }

    fn chain() -> ChainContext {
        let mut chain = ChainContext::new("kubernetes", json!({"namespace": "stuck-ns"}), "s1");
        chain.current_stage_name = "data-collection".into();
        chain
    }

    #[tokio::test]
    async fn unknown_agent_lists_known_ones() {
        let (factory, _) = factory_with(vec![]);
        let err = factory.create_agent("GhostAgent", None).unwrap_err();
        assert!(err.to_string().contains("GhostAgent"));
        assert!(err.to_string().contains("KubernetesAgent"));
    }

    #[tokio::test]
    async fn stage_execution_discovers_tools_and_wraps_result() {
        let (factory, _) = factory_with(vec![ScriptedTurn::Text(
            "Final Answer: Data collection complete.".into(),
        )]);
        let mut agent = factory.create_agent("KubernetesAgent", None).unwrap();
        agent.bind_stage("s1", "e1");

        let result = agent.execute_stage(&chain()).await.unwrap();
        assert!(result.is_completed());
        assert_eq!(result.agent_name, "KubernetesAgent");
        assert_eq!(result.final_analysis.as_deref(), Some("Data collection complete."));
        assert_eq!(result.iterations, 1);
        assert!(result.result_summary.starts_with("## Analysis Result"));
    }

    #[tokio::test]
    async fn allow_list_violation_records_error_without_contacting_client() {
        let (factory, recorder) = factory_with(vec![]);
        let mut agent = factory.create_agent("KubernetesAgent", None).unwrap();
        agent.bind_stage("s1", "e1");

        let outcomes = agent
            .execute_tools(&[ToolRequest {
                server: "forbidden-server".into(),
                tool: "x".into(),
                parameters: json!({}),
                reason: "test".into(),
            }])
            .await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_success());
        assert!(outcomes[0].error.as_deref().unwrap().contains("not allowed"));

        // Exactly one mcp.error event, no mcp.pre (the client was never called).
        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, events::MCP_ERROR);
        assert!(!seen[0].1.success);
        assert!(seen[0].1.error_message.as_deref().unwrap().contains("not allowed"));
    }

    #[tokio::test]
    async fn allowed_tool_calls_go_through_the_client() {
        let (factory, recorder) = factory_with(vec![]);
        let mut agent = factory.create_agent("KubernetesAgent", None).unwrap();
        agent.bind_stage("s1", "e1");

        let outcomes = agent
            .execute_tools(&[ToolRequest {
                server: "kubernetes-server".into(),
                tool: "kubectl_get".into(),
                parameters: json!({"namespace": "stuck-ns"}),
                reason: "test".into(),
            }])
            .await;
        assert!(outcomes[0].is_success());

        let seen = recorder.seen.lock();
        let kinds: Vec<&str> = seen.iter().map(|(e, _)| e.as_str()).collect();
        assert_eq!(kinds, vec![events::MCP_PRE, events::MCP_POST]);
    }

    #[tokio::test]
    async fn tool_list_failure_fails_the_stage() {
        let hooks = Arc::new(HookManager::new());
        let transport = ScriptedTransport::new().failing_on("tools/list");
        let mut registry = McpServerRegistry::empty();
        registry.insert(McpServerConnection::with_transport("kubernetes-server", Box::new(transport), None));
        let mcp = Arc::new(McpToolClient::new(Arc::new(registry), hooks.clone()));
        let llm = Arc::new(LlmManager::with_providers(
            vec![("mock", Arc::new(MockLlmClient::with_texts(&["unused"])) as Arc<dyn LlmClient>)],
            "mock",
            Arc::new(HookManager::new()),
        ));
        let settings = ControllerSettings { max_iterations: 10, iteration_timeout: Duration::from_secs(300) };
        let factory = AgentFactory::new(llm, mcp, hooks, &HashMap::new(), settings);

        let mut agent = factory.create_agent("KubernetesAgent", None).unwrap();
        agent.bind_stage("s1", "e1");
        assert!(agent.execute_stage(&chain()).await.is_err());
    }

    #[tokio::test]
    async fn configured_agent_overrides_apply() {
        let (factory_base, _) = factory_with(vec![]);
        let mut configured = HashMap::new();
        configured.insert(
            "SecurityAgent".to_owned(),
            ConfiguredAgent {
                mcp_servers: vec!["kubernetes-server".into()],
                custom_instructions: "Focus on RBAC.".into(),
                max_iterations: Some(3),
                iteration_strategy: Some(IterationStrategy::ReactStage),
            },
        );
        let factory = AgentFactory::new(
            factory_base.llm.clone(),
            factory_base.mcp.clone(),
            factory_base.hooks.clone(),
            &configured,
            factory_base.settings,
        );
        let agent = factory.create_agent("SecurityAgent", None).unwrap();
        assert_eq!(agent.mcp_servers(), ["kubernetes-server"]);
        assert!(factory.known_agents().contains(&"SecurityAgent".to_string()));
    }
}
