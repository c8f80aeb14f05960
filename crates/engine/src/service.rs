//! The alert service — top-level orchestration.
//!
//! One call to [`AlertService::process_alert`] runs the whole per-alert
//! lifecycle: preflight, chain selection, session creation, runbook fetch,
//! the sequential stage loop (with its error policy and wall-clock
//! deadline), final-analysis extraction, response formatting, and session
//! completion. Submission-side duplicate suppression and the bounded worker
//! pool also live here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use tarsy_domain::alert::{Alert, AlertKey};
use tarsy_domain::chain::ChainDefinition;
use tarsy_domain::config::ProcessingConfig;
use tarsy_domain::context::{AgentExecutionResult, ChainContext};
use tarsy_domain::error::Result;
use tarsy_domain::model::{now_us, AlertSession, SessionStatus, StageExecution};
use tarsy_history::HistoryStore;
use tarsy_hooks::{events, HookManager, HookPayload};
use tarsy_llm::LlmManager;

use crate::agent::AgentFactory;
use crate::cache::TtlCache;
use crate::chain_registry::ChainRegistry;
use crate::runbook::RunbookFetcher;

/// Bounds for the issuer-facing id caches.
const ID_CACHE_ENTRIES: usize = 10_000;
const ID_CACHE_TTL: Duration = Duration::from_secs(4 * 3600);

/// What the submission endpoint reports back.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub alert_id: String,
    pub duplicate: bool,
}

/// Aggregate outcome of one chain run.
struct ChainRunOutcome {
    successful_stages: usize,
    failed_stages: usize,
    total_iterations: u32,
    last_error: Option<String>,
}

pub struct AlertService {
    processing: ProcessingConfig,
    chain_registry: ChainRegistry,
    agent_factory: AgentFactory,
    llm: Arc<LlmManager>,
    history: Option<Arc<HistoryStore>>,
    hooks: Arc<HookManager>,
    runbook: Arc<dyn RunbookFetcher>,
    /// In-flight duplicate suppression: AlertKey → issuer-facing alert id.
    processing_keys: Mutex<HashMap<AlertKey, String>>,
    /// api_alert_id → session_id, for the status endpoint.
    session_mapping: TtlCache<String, String>,
    /// Every alert id this process has issued.
    known_alert_ids: TtlCache<String, ()>,
    semaphore: Arc<Semaphore>,
    accepting: AtomicBool,
}

impl AlertService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        processing: ProcessingConfig,
        chain_registry: ChainRegistry,
        agent_factory: AgentFactory,
        llm: Arc<LlmManager>,
        history: Option<Arc<HistoryStore>>,
        hooks: Arc<HookManager>,
        runbook: Arc<dyn RunbookFetcher>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(processing.max_concurrent_alerts));
        Self {
            processing,
            chain_registry,
            agent_factory,
            llm,
            history,
            hooks,
            runbook,
            processing_keys: Mutex::new(HashMap::new()),
            session_mapping: TtlCache::new(ID_CACHE_ENTRIES, ID_CACHE_TTL),
            known_alert_ids: TtlCache::new(ID_CACHE_ENTRIES, ID_CACHE_TTL),
            semaphore,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn chain_registry(&self) -> &ChainRegistry {
        &self.chain_registry
    }

    pub fn llm_available(&self) -> bool {
        self.llm.is_available()
    }

    pub fn session_id_for_alert(&self, api_alert_id: &str) -> Option<String> {
        self.session_mapping.get(&api_alert_id.to_owned())
    }

    pub fn alert_exists(&self, api_alert_id: &str) -> bool {
        self.known_alert_ids.contains(&api_alert_id.to_owned())
    }

    /// Stop accepting new alerts (graceful shutdown).
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Wait until no alert is in flight, up to the deadline. Returns whether
    /// the service drained in time.
    pub async fn drain(&self, deadline: Duration) -> bool {
        let poll = async {
            loop {
                if self.processing_keys.lock().await.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(deadline, poll).await.is_ok()
    }

    // ── Submission ─────────────────────────────────────────────────

    /// Accept an alert for background processing.
    ///
    /// At most one concurrent processing per [`AlertKey`]: a duplicate
    /// submission returns the first submission's alert id without enqueuing.
    pub async fn submit_alert(self: Arc<Self>, alert: Alert) -> Result<SubmissionOutcome> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(tarsy_domain::Error::Other("service is shutting down".into()));
        }

        let key = AlertKey::from_alert(&alert);
        let api_alert_id = {
            let mut keys = self.processing_keys.lock().await;
            if let Some(existing) = keys.get(&key) {
                tracing::info!(alert_key = %key, alert_id = %existing, "duplicate alert suppressed");
                return Ok(SubmissionOutcome { alert_id: existing.clone(), duplicate: true });
            }
            let api_alert_id = Uuid::new_v4().to_string();
            keys.insert(key.clone(), api_alert_id.clone());
            api_alert_id
        };
        self.known_alert_ids.insert(api_alert_id.clone(), ());

        let service = self.clone();
        let spawned_id = api_alert_id.clone();
        tokio::spawn(async move {
            // The semaphore bounds how many alerts process concurrently.
            let _permit = service.semaphore.clone().acquire_owned().await;
            let result = service.process_alert(alert, Some(&spawned_id)).await;
            tracing::debug!(alert_id = %spawned_id, chars = result.len(), "alert processing finished");
            // Always release the duplicate-suppression entry.
            service.processing_keys.lock().await.remove(&key);
        });

        Ok(SubmissionOutcome { alert_id: api_alert_id, duplicate: false })
    }

    // ── Processing ─────────────────────────────────────────────────

    /// Process one alert to a formatted analysis report (or error report).
    pub async fn process_alert(&self, alert: Alert, api_alert_id: Option<&str>) -> String {
        // Preflight: no point creating state we cannot drive.
        if !self.llm.is_available() {
            let msg = "Cannot process alert: no LLM providers are available";
            tracing::error!("{msg}");
            return self.format_error_response(&alert, msg);
        }

        // Chain selection.
        let chain = match self.chain_registry.get_chain_for_alert_type(&alert.alert_type) {
            Ok(chain) => chain.clone(),
            Err(e) => {
                let msg = e.to_string();
                tracing::error!(alert_type = %alert.alert_type, "chain selection failed: {msg}");
                self.record_unroutable_session(&alert, &msg);
                return self.format_error_response(&alert, &msg);
            }
        };
        tracing::info!(chain_id = %chain.chain_id, alert_type = %alert.alert_type, "selected chain");

        // Session creation (no-op when history is disabled).
        let session = self.create_session(&alert, &chain);
        let session_id = session.session_id.clone();
        if let Some(api_alert_id) = api_alert_id {
            self.session_mapping.insert(api_alert_id.to_owned(), session_id.clone());
        }
        self.update_session_status(&session_id, SessionStatus::InProgress, None, None);

        // Runbook fetch, once per chain.
        let Some(runbook_url) = alert.runbook_url().map(str::to_owned) else {
            let msg = "No runbook specified in alert data";
            self.update_session_status(&session_id, SessionStatus::Failed, None, Some(msg));
            return self.format_error_response(&alert, msg);
        };
        let runbook_content = match self.runbook.fetch(&runbook_url).await {
            Ok(content) => content,
            Err(e) => {
                let msg = format!("Runbook download failed: {e}");
                self.update_session_status(&session_id, SessionStatus::Failed, None, Some(&msg));
                return self.format_error_response(&alert, &msg);
            }
        };

        // Chain context carried across stages.
        let mut chain_ctx = ChainContext::new(&alert.alert_type, alert.alert_data.clone(), &session_id);
        chain_ctx.chain_id = Some(chain.chain_id.clone());
        chain_ctx.runbook_content = Some(runbook_content);

        // Stage loop under the per-alert wall-clock deadline. The slot holds
        // the stage currently executing so a timeout can close it out.
        let current_execution: Arc<SyncMutex<Option<StageExecution>>> = Arc::new(SyncMutex::new(None));
        let deadline = Duration::from_secs(self.processing.alert_processing_timeout_secs);
        let run = self.execute_chain_stages(&chain, &mut chain_ctx, &session_id, &current_execution);

        let outcome = match tokio::time::timeout(deadline, run).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let msg = format!(
                    "Alert processing exceeded {}s timeout",
                    self.processing.alert_processing_timeout_secs
                );
                tracing::error!(session_id = %session_id, "{msg}");
                let taken_execution = current_execution.lock().take();
                if let Some(mut execution) = taken_execution {
                    execution.mark_failed(msg.clone());
                    self.persist_stage_update(&execution);
                    self.hooks
                        .trigger(events::STAGE_FAILED, HookPayload::Stage(execution))
                        .await;
                }
                self.update_session_status(&session_id, SessionStatus::Failed, None, Some(&msg));
                return self.format_error_response(&alert, &msg);
            }
        };

        // Final analysis extraction and completion.
        let total_stages = chain.stages.len();
        if outcome.failed_stages == total_stages {
            let msg = format!(
                "All {total_stages} stages failed; last error: {}",
                outcome.last_error.as_deref().unwrap_or("unknown")
            );
            self.update_session_status(&session_id, SessionStatus::Failed, None, Some(&msg));
            return self.format_error_response(&alert, &msg);
        }

        let analysis = match Self::extract_final_analysis(&chain_ctx) {
            Some(analysis) => analysis,
            None if outcome.failed_stages > 0 => {
                let msg = format!(
                    "{} of {total_stages} stages failed and no stage produced an analysis",
                    outcome.failed_stages
                );
                self.update_session_status(&session_id, SessionStatus::Failed, None, Some(&msg));
                return self.format_error_response(&alert, &msg);
            }
            None => format!(
                "Chain {} completed with {} stages.",
                chain.chain_id,
                chain_ctx.stage_outputs().len()
            ),
        };

        let formatted = self.format_success_response(&alert, &chain, &analysis, outcome.total_iterations);
        self.update_session_status(&session_id, SessionStatus::Completed, Some(&formatted), None);
        tracing::info!(
            session_id = %session_id,
            successful = outcome.successful_stages,
            failed = outcome.failed_stages,
            iterations = outcome.total_iterations,
            "alert processing completed"
        );
        formatted
    }

    /// Execute the chain's stages sequentially with accumulated context.
    ///
    /// Error policy: a stage failure is recorded, a recoverable error result
    /// is appended for later stages, and the loop continues.
    async fn execute_chain_stages(
        &self,
        chain: &ChainDefinition,
        chain_ctx: &mut ChainContext,
        session_id: &str,
        current_execution: &Arc<SyncMutex<Option<StageExecution>>>,
    ) -> ChainRunOutcome {
        let mut outcome = ChainRunOutcome {
            successful_stages: 0,
            failed_stages: 0,
            total_iterations: 0,
            last_error: None,
        };

        for (index, stage) in chain.stages.iter().enumerate() {
            tracing::info!(
                stage = %stage.name,
                agent = %stage.agent,
                index,
                total = chain.stages.len(),
                "executing stage"
            );

            let mut execution = StageExecution::new(session_id, &stage.name, &stage.agent, index as i64);
            self.persist_stage_create(&execution);
            self.persist_session_current_stage(session_id, index as i64, &execution.execution_id);

            execution.mark_started();
            self.persist_stage_update(&execution);
            self.hooks
                .trigger(events::STAGE_STARTED, HookPayload::Stage(execution.clone()))
                .await;
            *current_execution.lock() = Some(execution.clone());

            chain_ctx.current_stage_name = stage.name.clone();

            // Fresh agent instance per stage, bound to this execution.
            let stage_result = match self.agent_factory.create_agent(&stage.agent, stage.iteration_strategy) {
                Ok(mut agent) => {
                    agent.bind_stage(session_id, &execution.execution_id);
                    agent.execute_stage(chain_ctx).await
                }
                Err(e) => Err(e),
            };

            match stage_result {
                Ok(result) => {
                    outcome.total_iterations += result.iterations;
                    outcome.successful_stages += 1;
                    execution.mark_completed(
                        serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
                        result.timestamp_us,
                    );
                    self.persist_stage_update(&execution);
                    self.hooks
                        .trigger(events::STAGE_COMPLETED, HookPayload::Stage(execution))
                        .await;
                    tracing::info!(stage = %stage.name, iterations = result.iterations, "stage completed");
                    chain_ctx.add_stage_result(&stage.name, result);
                }
                Err(e) => {
                    let msg = format!("Stage '{}' failed with agent '{}': {e}", stage.name, stage.agent);
                    tracing::error!("{msg}");
                    outcome.failed_stages += 1;
                    outcome.last_error = Some(msg.clone());
                    execution.mark_failed(msg.clone());
                    self.persist_stage_update(&execution);
                    self.hooks
                        .trigger(events::STAGE_FAILED, HookPayload::Stage(execution))
                        .await;
                    chain_ctx.add_stage_result(
                        &stage.name,
                        AgentExecutionResult::failed(&stage.agent, Some(stage.name.clone()), e.to_string()),
                    );
                    tracing::warn!(stage = %stage.name, "continuing chain despite stage failure");
                }
            }
            *current_execution.lock() = None;
        }

        outcome
    }

    /// Reverse-search the stage outputs for the most recent completed stage
    /// carrying an analysis.
    fn extract_final_analysis(chain_ctx: &ChainContext) -> Option<String> {
        chain_ctx
            .stage_outputs()
            .iter()
            .rev()
            .filter(|(_, r)| r.is_completed())
            .find_map(|(_, r)| r.final_analysis.clone())
            .filter(|a| !a.trim().is_empty())
    }

    // ── History persistence (no-ops when history is disabled) ───────

    fn create_session(&self, alert: &Alert, chain: &ChainDefinition) -> AlertSession {
        let alert_id = format!(
            "{}_{}_{}",
            alert.alert_type,
            &Uuid::new_v4().simple().to_string()[..12],
            now_us()
        );
        let session = AlertSession::new(
            alert_id,
            alert.alert_type.clone(),
            alert.alert_data.clone(),
            chain.chain_id.clone(),
            chain.to_json(),
        );
        if let Some(history) = &self.history {
            if let Err(e) = history.create_session(&session) {
                tracing::warn!(error = %e, "failed to create history session");
            }
        }
        session
    }

    /// Record a session for an alert no chain claims, so the failure is
    /// visible in history.
    fn record_unroutable_session(&self, alert: &Alert, error: &str) {
        let Some(history) = &self.history else { return };
        let alert_id = format!("{}_{}_{}", alert.alert_type, &Uuid::new_v4().simple().to_string()[..12], now_us());
        let mut session = AlertSession::new(
            alert_id,
            alert.alert_type.clone(),
            alert.alert_data.clone(),
            "none".into(),
            serde_json::Value::Null,
        );
        session.status = SessionStatus::Failed;
        session.completed_at_us = Some(now_us());
        session.error_message = Some(error.to_owned());
        if let Err(e) = history.create_session(&session) {
            tracing::warn!(error = %e, "failed to record unroutable session");
        }
    }

    fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        final_analysis: Option<&str>,
        error_message: Option<&str>,
    ) {
        if let Some(history) = &self.history {
            if let Err(e) = history.update_session_status(session_id, status, final_analysis, error_message) {
                tracing::warn!(error = %e, session_id, "failed to update session status");
            }
        }
    }

    fn persist_session_current_stage(&self, session_id: &str, index: i64, execution_id: &str) {
        if let Some(history) = &self.history {
            if let Err(e) = history.update_session_current_stage(session_id, index, execution_id) {
                tracing::warn!(error = %e, session_id, "failed to update current stage");
            }
        }
    }

    fn persist_stage_create(&self, execution: &StageExecution) {
        if let Some(history) = &self.history {
            if let Err(e) = history.create_stage_execution(execution) {
                tracing::warn!(error = %e, execution_id = %execution.execution_id, "failed to create stage execution");
            }
        }
    }

    fn persist_stage_update(&self, execution: &StageExecution) {
        if let Some(history) = &self.history {
            if let Err(e) = history.update_stage_execution(execution) {
                tracing::warn!(error = %e, execution_id = %execution.execution_id, "failed to update stage execution");
            }
        }
    }

    // ── Response formatting ────────────────────────────────────────

    fn format_success_response(
        &self,
        alert: &Alert,
        chain: &ChainDefinition,
        analysis: &str,
        total_iterations: u32,
    ) -> String {
        [
            "# Alert Analysis Report".to_owned(),
            String::new(),
            format!("**Alert Type:** {}", alert.alert_type),
            format!("**Processing Chain:** {}", chain.chain_id),
            format!("**Stages:** {}", chain.stages.len()),
            format!("**Environment:** {}", alert.environment()),
            format!("**Severity:** {}", alert.severity()),
            format!("**Timestamp:** {}", now_us()),
            String::new(),
            "## Analysis".to_owned(),
            String::new(),
            analysis.to_owned(),
            String::new(),
            "---".to_owned(),
            format!(
                "*Processed through {} stages in {} total iterations*",
                chain.stages.len(),
                total_iterations
            ),
        ]
        .join("\n")
    }

    fn format_error_response(&self, alert: &Alert, error: &str) -> String {
        [
            "# Alert Processing Error".to_owned(),
            String::new(),
            format!("**Alert Type:** {}", alert.alert_type),
            format!("**Environment:** {}", alert.environment()),
            format!("**Error:** {error}"),
            String::new(),
            "## Troubleshooting".to_owned(),
            String::new(),
            "1. Check that the alert type is supported".to_owned(),
            "2. Verify agent configuration in settings".to_owned(),
            "3. Ensure all required services are available".to_owned(),
            "4. Review logs for detailed error information".to_owned(),
        ]
        .join("\n")
    }
}
