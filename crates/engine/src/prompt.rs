//! Deterministic prompt construction for every iteration strategy.
//!
//! Section order is fixed: context, alert details, runbook, prior-stage
//! results (in execution order), available tools, and the stage-specific
//! task block. Alert data renders key-by-key with type-aware formatting so
//! the model sees nested payloads as fenced JSON instead of flattened text.

use serde_json::Value;

use tarsy_domain::context::{AvailableTools, StageContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System instructions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// General SRE instructions shared by every agent.
pub fn general_instructions() -> &'static str {
    "## General SRE Agent Instructions\n\n\
     You are an expert Site Reliability Engineer (SRE) with deep knowledge of:\n\
     - Kubernetes and container orchestration\n\
     - Cloud infrastructure and services\n\
     - Incident response and troubleshooting\n\
     - System monitoring and alerting\n\
     - GitOps and deployment practices\n\n\
     Analyze alerts thoroughly and provide actionable insights based on:\n\
     1. Alert information and context\n\
     2. Associated runbook procedures\n\
     3. Real-time system data from available tools\n\n\
     Always be specific, reference actual data, and provide clear next steps.\n\
     Focus on root cause analysis and sustainable solutions."
}

/// General instructions plus the agent's own block when it has one.
pub fn compose_system_message(custom_instructions: &str) -> String {
    if custom_instructions.is_empty() {
        general_instructions().to_owned()
    } else {
        format!(
            "{}\n\n## Agent-Specific Instructions\n{}",
            general_instructions(),
            custom_instructions
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn build_context_section(ctx: &StageContext<'_>) -> String {
    let server_list = ctx.mcp_servers.join(", ");
    format!(
        "# SRE Alert Analysis Request\n\n\
         You are an expert Site Reliability Engineer (SRE) analyzing a system alert using the {agent}.\n\
         This agent specializes in {servers} operations and has access to domain-specific tools and knowledge.",
        agent = ctx.agent_name,
        servers = server_list,
    )
}

/// Key-by-key alert rendering: nested objects/arrays as fenced JSON,
/// multi-line strings as fenced code, scalars inline.
pub fn build_alert_section(alert_data: &Value) -> String {
    let Some(map) = alert_data.as_object().filter(|m| !m.is_empty()) else {
        return "## Alert Details\n\nNo alert data provided.".to_owned();
    };

    let mut out = String::from("## Alert Details\n\n");
    for (key, value) in map {
        let formatted_key = humanize_key(key);
        let formatted_value = match value {
            Value::Object(_) | Value::Array(_) => {
                let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                format!("\n```json\n{pretty}\n```")
            }
            Value::String(s) if looks_like_json(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed) => {
                    let pretty = serde_json::to_string_pretty(&parsed).unwrap_or_else(|_| s.clone());
                    format!("\n```json\n{pretty}\n```")
                }
                Err(_) => s.clone(),
            },
            Value::String(s) if s.contains('\n') => format!("\n```\n{s}\n```"),
            Value::String(s) => s.clone(),
            Value::Null => "N/A".to_owned(),
            other => other.to_string(),
        };
        out.push_str(&format!("**{formatted_key}:** {formatted_value}\n"));
    }
    out.trim_end().to_owned()
}

fn humanize_key(key: &str) -> String {
    key.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn looks_like_json(s: &str) -> bool {
    let t = s.trim_start();
    t.starts_with('{') || t.starts_with('[')
}

pub fn build_runbook_section(runbook_content: &str) -> String {
    let body = if runbook_content.is_empty() { "No runbook available" } else { runbook_content };
    format!(
        "## Runbook Content\n```markdown\n<!-- RUNBOOK START -->\n{body}\n<!-- RUNBOOK END -->\n```"
    )
}

fn build_previous_stages_section(ctx: &StageContext<'_>) -> String {
    format!("## Previous Stage Results\n\n{}", ctx.format_previous_stages())
}

/// Available actions with parameter descriptions pulled from each tool's
/// input schema. The action set shown is exactly the allowed set.
pub fn format_available_actions(tools: &AvailableTools) -> String {
    if tools.is_empty() {
        return "No tools available.".to_owned();
    }
    let mut actions = Vec::new();
    for tool in &tools.tools {
        let name = tool.action_name();
        let params = tool
            .input_schema
            .pointer("/properties")
            .and_then(Value::as_object)
            .map(|props| {
                props
                    .iter()
                    .map(|(k, schema)| {
                        let desc = schema
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("no description");
                        format!("{k}: {desc}")
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty());
        match params {
            Some(params) => actions.push(format!("{name}: {}\n  Parameters: {params}", tool.description)),
            None => actions.push(format!("{name}: {}", tool.description)),
        }
    }
    actions.join("\n")
}

fn action_names(tools: &AvailableTools) -> String {
    if tools.is_empty() {
        return "No tools available".to_owned();
    }
    tools
        .tools
        .iter()
        .map(|t| t.action_name())
        .collect::<Vec<_>>()
        .join(", ")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ReAct prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REACT_FORMAT_INSTRUCTIONS: &str = "\
Use the following format:

Question: the input question you must answer
Thought: you should always think about what to do
Action: the action to take, should be one of the available actions
Action Input: the input to the action
Observation: the result of the action
... (this Thought/Action/Action Input/Observation can repeat N times)
Thought: I now know the final answer
Final Answer: the final answer to the original input question

IMPORTANT: Only provide the next step. Either:
1. Continue investigating with \"Thought: [reasoning] Action: [action] Action Input: [input]\"
2. OR conclude with \"Thought: I now know the final answer Final Answer: [your analysis]\"

DO NOT write fake Observations - the system provides real observations after executing actions.";

fn react_question(ctx: &StageContext<'_>, task_block: &str) -> String {
    let mut sections = vec![
        build_context_section(ctx),
        build_alert_section(ctx.alert_data()),
        build_runbook_section(ctx.runbook_content()),
    ];
    if ctx.has_previous_stages() {
        sections.push(build_previous_stages_section(ctx));
    }
    sections.push(task_block.to_owned());
    sections.join("\n\n")
}

fn assemble_react_prompt(ctx: &StageContext<'_>, task_block: &str, history: &[String]) -> String {
    let history_text = if history.is_empty() {
        String::new()
    } else {
        format!("{}\n", history.join("\n"))
    };
    format!(
        "Answer the following question as best you can. You have access to the following tools:\n\n\
         {actions}\n\n\
         {format}\n\n\
         Begin!\n\n\
         Question: Analyze this {alert_type} alert and provide actionable recommendations.\n\n\
         {question}\n{history}",
        actions = format_available_actions(ctx.available_tools),
        format = REACT_FORMAT_INSTRUCTIONS,
        alert_type = ctx.chain.alert_type,
        question = react_question(ctx, task_block),
        history = history_text,
    )
    // Note the allowed action names are also embedded in the question's task
    // block so the model never has to guess the set.
}

/// Classic ReAct prompt: full investigation toward a final incident answer.
pub fn build_react_prompt(ctx: &StageContext<'_>, history: &[String]) -> String {
    let task_block = format!(
        "## Your Task\n\
         Use the available tools ([{names}]) to investigate this alert and provide:\n\
         1. Root cause analysis\n\
         2. Current system state assessment\n\
         3. Specific remediation steps for human operators\n\
         4. Prevention recommendations\n\n\
         Be thorough in your investigation before providing the final answer.",
        names = action_names(ctx.available_tools),
    );
    assemble_react_prompt(ctx, &task_block, history)
}

/// Stage-aware ReAct prompt: the stage contributes a partial result that
/// later stages build on.
pub fn build_stage_react_prompt(ctx: &StageContext<'_>, history: &[String]) -> String {
    let task_block = format!(
        "## Your Task: '{stage}' Stage\n\
         You are executing the '{stage}' stage of a multi-stage analysis chain.\n\
         Use the available tools ([{names}]) to complete this stage's objective.\n\
         When the stage objective is met, finish with a line of the form\n\
         \"Stage Complete: <one-paragraph summary of what this stage established>\"\n\
         or provide a Final Answer if you already reached a conclusion.",
        stage = ctx.stage_name(),
        names = action_names(ctx.available_tools),
    );
    assemble_react_prompt(ctx, &task_block, history)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Final analysis
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// User prompt for the no-tools final-analysis stage: everything the chain
/// established, asking for the comprehensive incident report.
pub fn build_final_analysis_prompt(ctx: &StageContext<'_>) -> String {
    let mut sections = vec![
        build_context_section(ctx),
        build_alert_section(ctx.alert_data()),
        build_runbook_section(ctx.runbook_content()),
    ];
    if ctx.has_previous_stages() {
        sections.push(build_previous_stages_section(ctx));
    }
    sections.push(
        "## Your Task\n\
         Provide the comprehensive final analysis of this incident using everything above. Include:\n\
         1. Root cause analysis\n\
         2. Impact assessment\n\
         3. Specific remediation steps for human operators\n\
         4. Prevention recommendations\n\n\
         Do not request more data; analyze what has been collected."
            .to_owned(),
    );
    sections.join("\n\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Native thinking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System message for native-function-calling providers. No ReAct grammar:
/// the model invokes tools natively and reasons internally.
pub fn native_thinking_system_message(custom_instructions: &str) -> String {
    format!(
        "{base}\n\n## Tool Use\n\
         Call the provided functions directly when you need system data.\n\
         When you have enough evidence, respond with your final analysis as plain text\n\
         focused on investigation and providing recommendations.",
        base = compose_system_message(custom_instructions),
    )
}

/// User prompt for the native-thinking loop (no format scaffolding).
pub fn build_native_thinking_prompt(ctx: &StageContext<'_>) -> String {
    let mut sections = vec![
        build_context_section(ctx),
        build_alert_section(ctx.alert_data()),
        build_runbook_section(ctx.runbook_content()),
    ];
    if ctx.has_previous_stages() {
        sections.push(build_previous_stages_section(ctx));
    }
    sections.push(
        "## Your Task\n\
         Investigate this alert using the bound tools, then provide actionable\n\
         root-cause analysis and remediation steps."
            .to_owned(),
    );
    sections.join("\n\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
