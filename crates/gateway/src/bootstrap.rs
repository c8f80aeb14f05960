//! AppState construction: initialize every subsystem and wire the
//! observability fabric (hook bus, history hook, dashboard hook) before the
//! HTTP listener comes up.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use tarsy_domain::config::{AgentConfigFile, Config, ConfigSeverity};
use tarsy_engine::controllers::ControllerSettings;
use tarsy_engine::{AgentFactory, AlertService, ChainRegistry, HttpRunbookFetcher};
use tarsy_history::{HistoryHook, HistoryStore};
use tarsy_hooks::HookManager;
use tarsy_llm::LlmManager;
use tarsy_mcp::{McpServerRegistry, McpToolClient};

use crate::state::AppState;
use crate::ws::{DashboardBroadcaster, DashboardHook};

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Agent/chain config file ──────────────────────────────────────
    let agent_config = match &config.agents.config_path {
        Some(path) => {
            let parsed = AgentConfigFile::load(path)
                .with_context(|| format!("loading agent config {}", path.display()))?;
            tracing::info!(
                agents = parsed.agents.len(),
                mcp_servers = parsed.mcp_servers.len(),
                chains = parsed.chains.len(),
                path = %path.display(),
                "agent config loaded"
            );
            parsed
        }
        None => AgentConfigFile::default(),
    };

    // ── Hook bus ─────────────────────────────────────────────────────
    let hooks = Arc::new(HookManager::new());

    // ── History store + orphan cleanup ───────────────────────────────
    let history = if config.history.enabled {
        let store = Arc::new(
            HistoryStore::open(&config.history.database_url).context("opening history store")?,
        );
        // Close out sessions a previous run left open. Never blocks startup.
        if let Err(e) = store.cleanup_orphaned_sessions() {
            tracing::warn!(error = %e, "orphaned session cleanup failed");
        }
        HistoryHook::register(store.clone(), &hooks);
        Some(store)
    } else {
        tracing::info!("history is disabled; the engine runs without persistence");
        None
    };

    // ── Broadcast layer ──────────────────────────────────────────────
    let broadcaster = Arc::new(DashboardBroadcaster::new());
    DashboardHook::register(broadcaster.clone(), &hooks);

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(LlmManager::from_config(&config.llm, hooks.clone()));
    if !llm.is_available() {
        tracing::warn!("no LLM providers available; alert processing will fail fast");
    }

    // ── Tool servers ─────────────────────────────────────────────────
    let mcp_registry = Arc::new(McpServerRegistry::from_config(&agent_config.mcp_servers).await);
    let mcp_client = Arc::new(McpToolClient::new(mcp_registry.clone(), hooks.clone()));

    // ── Agents + chains ──────────────────────────────────────────────
    let settings = ControllerSettings {
        max_iterations: config.processing.max_total_iterations,
        iteration_timeout: Duration::from_secs(config.processing.llm_iteration_timeout_secs),
    };
    let agent_factory = AgentFactory::new(
        llm.clone(),
        mcp_client,
        hooks.clone(),
        &agent_config.agents,
        settings,
    );
    let chain_registry = ChainRegistry::new(&agent_config.chains, &agent_factory.known_agents())
        .context("building chain registry")?;

    // ── Alert service ────────────────────────────────────────────────
    let alerts = Arc::new(AlertService::new(
        config.processing.clone(),
        chain_registry,
        agent_factory,
        llm,
        history.clone(),
        hooks.clone(),
        Arc::new(HttpRunbookFetcher::new()),
    ));

    Ok(AppState {
        config,
        alerts,
        history,
        hooks,
        broadcaster,
        mcp_registry,
    })
}
