//! End-to-end chain execution scenarios against a scripted LLM and an
//! in-process tool server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tarsy_domain::alert::Alert;
use tarsy_domain::chain::{ChainStage, IterationStrategy};
use tarsy_domain::config::{ConfiguredChain, ProcessingConfig};
use tarsy_domain::model::{SessionStatus, StageStatus};
use tarsy_engine::controllers::ControllerSettings;
use tarsy_engine::{AgentFactory, AlertService, ChainRegistry, StaticRunbookFetcher};
use tarsy_history::{HistoryHook, HistoryStore, SessionFilter};
use tarsy_hooks::HookManager;
use tarsy_llm::mock::ScriptedTurn;
use tarsy_llm::{LlmClient, LlmManager, MockLlmClient};
use tarsy_mcp::registry::{McpServerConnection, McpServerRegistry};
use tarsy_mcp::testing::ScriptedTransport;
use tarsy_mcp::McpToolClient;

struct Harness {
    service: Arc<AlertService>,
    history: Arc<HistoryStore>,
}

fn kubernetes_alert() -> Alert {
    Alert::new(
        "kubernetes",
        json!({
            "namespace": "stuck-ns",
            "runbook": "https://ex/rb.md",
            "severity": "critical",
        }),
    )
}

fn build_harness(turns: Vec<ScriptedTurn>, options: HarnessOptions) -> Harness {
    let hooks = Arc::new(HookManager::new());
    let history = Arc::new(HistoryStore::in_memory().unwrap());
    HistoryHook::register(history.clone(), &hooks);

    let transport = if options.fail_tool_list {
        ScriptedTransport::new().failing_on("tools/list")
    } else {
        ScriptedTransport::new()
            .on(
                "tools/list",
                json!({"tools": [{"name": "kubectl_get", "description": "Get resources"}]}),
            )
            .on(
                "tools/call",
                json!({"content": [{"type": "text", "text": "{\"phase\": \"Terminating\"}"}]}),
            )
    };
    let mut registry = McpServerRegistry::empty();
    registry.insert(McpServerConnection::with_transport(
        "kubernetes-server",
        Box::new(transport),
        None,
    ));
    let mcp = Arc::new(McpToolClient::new(Arc::new(registry), hooks.clone()));

    let llm = Arc::new(LlmManager::with_providers(
        vec![("mock", Arc::new(MockLlmClient::new(turns)) as Arc<dyn LlmClient>)],
        "mock",
        hooks.clone(),
    ));

    let processing = ProcessingConfig {
        max_concurrent_alerts: 5,
        llm_iteration_timeout_secs: options.llm_iteration_timeout_secs,
        alert_processing_timeout_secs: options.alert_processing_timeout_secs,
        max_total_iterations: options.max_iterations,
    };
    let settings = ControllerSettings {
        max_iterations: processing.max_total_iterations,
        iteration_timeout: Duration::from_secs(processing.llm_iteration_timeout_secs),
    };
    let factory = AgentFactory::new(llm.clone(), mcp, hooks.clone(), &options.agents, settings);
    let chains = ChainRegistry::new(&options.chains, &factory.known_agents()).unwrap();

    let service = Arc::new(AlertService::new(
        processing,
        chains,
        factory,
        llm,
        Some(history.clone()),
        hooks,
        Arc::new(StaticRunbookFetcher { content: "## Runbook\ncheck finalizers".into() }),
    ));
    Harness { service, history }
}

struct HarnessOptions {
    max_iterations: u32,
    llm_iteration_timeout_secs: u64,
    alert_processing_timeout_secs: u64,
    fail_tool_list: bool,
    agents: HashMap<String, tarsy_domain::config::ConfiguredAgent>,
    chains: HashMap<String, ConfiguredChain>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            llm_iteration_timeout_secs: 300,
            alert_processing_timeout_secs: 600,
            fail_tool_list: false,
            agents: HashMap::new(),
            chains: HashMap::new(),
        }
    }
}

fn single_stage_chain(alert_type: &str, strategy: IterationStrategy) -> HashMap<String, ConfiguredChain> {
    let mut chains = HashMap::new();
    chains.insert(
        format!("{alert_type}-chain"),
        ConfiguredChain {
            alert_types: vec![alert_type.to_owned()],
            stages: vec![ChainStage {
                name: "triage".into(),
                agent: "KubernetesAgent".into(),
                iteration_strategy: Some(strategy),
            }],
        },
    );
    chains
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — happy path through the built-in kubernetes chain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_happy_path_kubernetes_chain() {
    let harness = build_harness(
        vec![
            // Stage 1 (react): one tool call, then the final answer.
            ScriptedTurn::Text(
                "Thought: inspect the namespace\nAction: kubernetes-server.kubectl_get\nAction Input: {\"namespace\": \"stuck-ns\"}"
                    .into(),
            ),
            ScriptedTurn::Text(
                "Thought: I now know the final answer\nFinal Answer: Data collection complete. Namespace stuck-ns is Terminating."
                    .into(),
            ),
            // Stage 2 (react-stage): ends through a completion pattern.
            ScriptedTurn::Text("Thought: Stage Complete: verification confirms the Terminating state".into()),
            ScriptedTurn::Text("Thought: Stage Complete: verification confirms the Terminating state".into()),
            // Stage 3 (react-final-analysis): the incident report.
            ScriptedTurn::Text(
                "## Incident Report\nNamespace stuck-ns is stuck Terminating because of a dangling finalizer.\n\nRemediation: remove the finalizer with kubectl patch and re-run the deletion."
                    .into(),
            ),
        ],
        HarnessOptions::default(),
    );

    let report = harness.service.process_alert(kubernetes_alert(), Some("api-1")).await;
    assert!(report.contains("# Alert Analysis Report"));
    assert!(report.contains("Terminating"));
    assert!(report.contains("Remediation"));
    assert!(report.contains("**Processing Chain:** kubernetes"));
    assert!(report.contains("**Severity:** critical"));

    // Session completed with the formatted report persisted.
    let session_id = harness.service.session_id_for_alert("api-1").unwrap();
    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.completed_at_us.unwrap() >= session.started_at_us);
    assert_eq!(session.final_analysis.as_deref(), Some(report.as_str()));

    // Three stages, all completed, dense zero-based indexes.
    let detail = harness.history.get_session_timeline(&session_id).unwrap().unwrap();
    assert_eq!(detail.stages.len(), 3);
    for (i, stage) in detail.stages.iter().enumerate() {
        assert_eq!(stage.execution.stage_index, i as i64);
        assert_eq!(stage.execution.status, StageStatus::Completed);
        assert!(stage.execution.duration_ms.is_some());
    }

    // Interactions landed under their stages in timestamp order.
    assert_eq!(detail.total_llm_interactions, 5);
    assert!(detail.total_mcp_communications >= 3); // 2 tool lists + 1 call
    for stage in &detail.stages {
        let stamps: Vec<i64> = stage.llm_interactions.iter().map(|i| i.timestamp_us).collect();
        let mut sorted = stamps.clone();
        sorted.sort();
        assert_eq!(stamps, sorted);
    }
    // The tool call observation fed the second LLM iteration of stage 1.
    let stage1 = &detail.stages[0];
    assert_eq!(stage1.llm_interactions.len(), 2);
    assert!(stage1.mcp_communications.iter().any(|m| m.tool_name.as_deref() == Some("kubectl_get")));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — duplicate suppression
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_duplicate_suppression() {
    // The first run stalls on its first LLM call so it is reliably still in
    // flight when the duplicate submission arrives; then enough final
    // answers for two full runs of the built-in chain.
    let mut turns = vec![ScriptedTurn::Stall(
        Duration::from_millis(300),
        "Final Answer: quick analysis".into(),
    )];
    turns.extend((0..12).map(|_| ScriptedTurn::Text("Final Answer: quick analysis".into())));
    let harness = build_harness(turns, HarnessOptions::default());

    let first = harness.service.clone().submit_alert(kubernetes_alert()).await.unwrap();
    assert!(!first.duplicate);

    // Identical payload while the first is still in flight.
    let second = harness.service.clone().submit_alert(kubernetes_alert()).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(second.alert_id, first.alert_id);

    // Wait for the first run to finish; the key is then released.
    assert!(harness.service.drain(Duration::from_secs(10)).await);

    let sessions = harness.history.list_sessions(&SessionFilter::default()).unwrap();
    assert_eq!(sessions.pagination.total_items, 1);

    let third = harness.service.clone().submit_alert(kubernetes_alert()).await.unwrap();
    assert!(!third.duplicate);
    assert_ne!(third.alert_id, first.alert_id);
    harness.service.drain(Duration::from_secs(10)).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — tool-allow-list violation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_allow_list_violation_recorded_and_loop_continues() {
    let harness = build_harness(
        vec![
            ScriptedTurn::Text(
                "Thought: try a forbidden server\nAction: forbidden-server.x\nAction Input: {}".into(),
            ),
            ScriptedTurn::Text("Final Answer: continued despite the rejected call".into()),
        ],
        HarnessOptions {
            chains: single_stage_chain("kubernetes-violation", IterationStrategy::React),
            ..Default::default()
        },
    );

    let mut alert = kubernetes_alert();
    alert.alert_type = "kubernetes-violation".into();
    let report = harness.service.process_alert(alert, Some("api-v")).await;
    assert!(report.contains("continued despite the rejected call"));

    let session_id = harness.service.session_id_for_alert("api-v").unwrap();
    let interactions = harness.history.mcp_interactions_for_session(&session_id).unwrap();
    let violation = interactions
        .iter()
        .find(|i| i.server_name == "forbidden-server")
        .expect("violation interaction recorded");
    assert!(!violation.success);
    assert!(violation.error_message.as_deref().unwrap().contains("not allowed"));
    // Only the error row exists for that server: the tool client was never
    // contacted, so there is no pre/post pair.
    assert_eq!(interactions.iter().filter(|i| i.server_name == "forbidden-server").count(), 1);

    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — max iterations reached
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_max_iterations_yields_partial_analysis() {
    let harness = build_harness(
        vec![
            ScriptedTurn::Text(
                "Thought: still collecting\nAction: kubernetes-server.kubectl_get\nAction Input: {}".into(),
            ),
            ScriptedTurn::Text(
                "Thought: still collecting evidence\nAction: kubernetes-server.kubectl_get\nAction Input: {}".into(),
            ),
        ],
        HarnessOptions {
            max_iterations: 2,
            chains: single_stage_chain("kubernetes-partial", IterationStrategy::React),
            ..Default::default()
        },
    );

    let mut alert = kubernetes_alert();
    alert.alert_type = "kubernetes-partial".into();
    let report = harness.service.process_alert(alert, Some("api-p")).await;
    assert!(report.contains("Maximum iterations (2) reached"));
    assert!(report.contains("still collecting evidence"));
    assert!(report.contains("in 2 total iterations"));

    let session_id = harness.service.session_id_for_alert("api-p").unwrap();
    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    // The stage completed with a partial analysis, so the session did too.
    assert_eq!(session.status, SessionStatus::Completed);
    let stages = harness.history.stage_executions_for_session(&session_id).unwrap();
    assert_eq!(stages[0].status, StageStatus::Completed);
}

#[tokio::test]
async fn max_iterations_one_still_honors_first_final_answer() {
    let harness = build_harness(
        vec![ScriptedTurn::Text("Final Answer: solved on the first step".into())],
        HarnessOptions {
            max_iterations: 1,
            chains: single_stage_chain("kubernetes-one", IterationStrategy::React),
            ..Default::default()
        },
    );
    let mut alert = kubernetes_alert();
    alert.alert_type = "kubernetes-one".into();
    let report = harness.service.process_alert(alert, None).await;
    assert!(report.contains("solved on the first step"));
    assert!(!report.contains("Maximum iterations"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — stage failure isolation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s5_stage_failure_does_not_abort_the_chain() {
    // tools/list fails, so both tool-using stages fail; the final-analysis
    // stage has no tool discovery and still produces the report.
    let harness = build_harness(
        vec![ScriptedTurn::Text("## Report\nanalysis from accumulated context".into())],
        HarnessOptions { fail_tool_list: true, ..Default::default() },
    );

    let report = harness.service.process_alert(kubernetes_alert(), Some("api-f")).await;
    assert!(report.contains("analysis from accumulated context"));

    let session_id = harness.service.session_id_for_alert("api-f").unwrap();
    let detail = harness.history.get_session_timeline(&session_id).unwrap().unwrap();
    assert_eq!(detail.stages.len(), 3);
    assert_eq!(detail.stages[0].execution.status, StageStatus::Failed);
    assert_eq!(detail.stages[1].execution.status, StageStatus::Failed);
    assert_eq!(detail.stages[2].execution.status, StageStatus::Completed);
    assert!(detail.stages[0]
        .execution
        .error_message
        .as_deref()
        .unwrap()
        .contains("data-collection"));

    // A later stage produced an analysis, so the session completed.
    assert_eq!(detail.session.status, SessionStatus::Completed);
}

#[tokio::test]
async fn all_stages_failing_fails_the_session() {
    let harness = build_harness(
        vec![],
        HarnessOptions {
            fail_tool_list: true,
            chains: single_stage_chain("kubernetes-doomed", IterationStrategy::React),
            ..Default::default()
        },
    );
    let mut alert = kubernetes_alert();
    alert.alert_type = "kubernetes-doomed".into();
    let report = harness.service.process_alert(alert, Some("api-d")).await;
    assert!(report.contains("# Alert Processing Error"));

    let session_id = harness.service.session_id_for_alert("api-d").unwrap();
    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.error_message.as_deref().unwrap().contains("All 1 stages failed"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts and preconditions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn alert_timeout_fails_session_and_closes_inflight_stage() {
    let harness = build_harness(
        vec![ScriptedTurn::Stall(Duration::from_secs(5), "too slow".into())],
        HarnessOptions {
            alert_processing_timeout_secs: 1,
            chains: single_stage_chain("kubernetes-slow", IterationStrategy::React),
            ..Default::default()
        },
    );

    let mut alert = kubernetes_alert();
    alert.alert_type = "kubernetes-slow".into();
    let report = harness.service.process_alert(alert, Some("api-t")).await;
    assert!(report.contains("exceeded 1s timeout"));

    let session_id = harness.service.session_id_for_alert("api-t").unwrap();
    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert!(session.completed_at_us.is_some());

    let stages = harness.history.stage_executions_for_session(&session_id).unwrap();
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0].status, StageStatus::Failed);
}

#[tokio::test]
async fn missing_runbook_fails_fast() {
    let harness = build_harness(vec![], HarnessOptions::default());
    let alert = Alert::new("kubernetes", json!({"namespace": "x"}));
    let report = harness.service.process_alert(alert, Some("api-r")).await;
    assert!(report.contains("No runbook specified"));

    let session_id = harness.service.session_id_for_alert("api-r").unwrap();
    let session = harness.history.get_session(&session_id).unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn unknown_alert_type_yields_error_report_and_failed_session() {
    let harness = build_harness(vec![], HarnessOptions::default());
    let alert = Alert::new("aws", json!({"runbook": "https://ex/rb.md"}));
    let report = harness.service.process_alert(alert, None).await;
    assert!(report.contains("# Alert Processing Error"));
    assert!(report.contains("no chain handles alert type 'aws'"));

    let sessions = harness.history.list_sessions(&SessionFilter::default()).unwrap();
    assert_eq!(sessions.pagination.total_items, 1);
    assert_eq!(sessions.sessions[0].status, "failed");
}
