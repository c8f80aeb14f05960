//! The tool-execution capability controllers depend on.
//!
//! Controllers never see the tool client directly: the agent provides this
//! capability at stage entry, which is also where allow-list enforcement
//! lives. This keeps the `agent → controller → agent` reference cycle out
//! of the design.

use async_trait::async_trait;

use tarsy_domain::context::{ToolOutcome, ToolRequest};

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute the requests sequentially, in declared order, returning one
    /// outcome per request. Never fails as a whole: per-request problems
    /// come back as error outcomes.
    async fn execute_tools(&self, requests: &[ToolRequest]) -> Vec<ToolOutcome>;
}
