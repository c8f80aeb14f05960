use std::sync::Arc;

use tarsy_domain::config::Config;
use tarsy_engine::AlertService;
use tarsy_history::HistoryStore;
use tarsy_hooks::HookManager;
use tarsy_mcp::McpServerRegistry;

use crate::ws::DashboardBroadcaster;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// The alert processing engine.
    pub alerts: Arc<AlertService>,
    /// Timeline store. `None` when history is disabled.
    pub history: Option<Arc<HistoryStore>>,
    /// Hook bus (observability fabric).
    pub hooks: Arc<HookManager>,
    /// WebSocket broadcaster (dashboard + per-session channels).
    pub broadcaster: Arc<DashboardBroadcaster>,
    /// Tool server registry, held for shutdown.
    pub mcp_registry: Arc<McpServerRegistry>,
}
