//! ReAct response parsing.
//!
//! The model answers in a line-oriented grammar (`Thought:` / `Action:` /
//! `Action Input:` / `Final Answer:`). Only the first occurrence of each
//! section header opens a section; later duplicates are content. A line
//! starting with `Observation:` or `[Based on` means the model started
//! hallucinating observations — parsing stops there.

use serde_json::{Map, Value};

use tarsy_domain::context::{ToolOutcome, ToolRequest};
use tarsy_domain::error::{Error, Result};

/// The parsed sections of one ReAct response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub thought: Option<String>,
    pub action: Option<String>,
    pub action_input: Option<String>,
    pub final_answer: Option<String>,
    pub is_complete: bool,
}

impl ParsedResponse {
    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
}

/// Parse a ReAct response into its sections. Idempotent on well-formed
/// inputs: parsing the same text always yields the same result.
pub fn parse_react_response(response: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut current: Option<Section> = None;
    let mut content: Vec<String> = Vec::new();
    let mut seen: Vec<Section> = Vec::new();

    let flush = |parsed: &mut ParsedResponse, section: Option<Section>, content: &[String]| {
        let text = content.join("\n").trim().to_owned();
        match section {
            Some(Section::Thought) => parsed.thought = Some(text),
            Some(Section::Action) => parsed.action = Some(text),
            Some(Section::ActionInput) => parsed.action_input = Some(text),
            _ => {}
        }
    };

    for raw_line in response.trim().lines() {
        let line = raw_line.trim();

        // Final Answer can appear at any step and ends the response.
        if let Some(rest) = line.strip_prefix("Final Answer:") {
            flush(&mut parsed, current, &content);
            current = Some(Section::FinalAnswer);
            content = vec![rest.trim().to_owned()];
            continue;
        }
        if current == Some(Section::FinalAnswer) {
            // Collect everything until another section header shows up.
            if line.starts_with("Thought:") || line.starts_with("Action:") || line.starts_with("Observation:") {
                break;
            }
            content.push(raw_line.trim_end().to_owned());
            continue;
        }

        if line.starts_with("Observation:") || line.starts_with("[Based on") {
            // Hallucinated observation: stop processing.
            flush(&mut parsed, current, &content);
            current = None;
            break;
        }

        if let Some(rest) = line.strip_prefix("Thought:") {
            if !seen.contains(&Section::Thought) {
                flush(&mut parsed, current, &content);
                current = Some(Section::Thought);
                seen.push(Section::Thought);
                content = vec![rest.trim().to_owned()];
                continue;
            }
        } else if let Some(rest) = line.strip_prefix("Action Input:") {
            if !seen.contains(&Section::ActionInput) {
                flush(&mut parsed, current, &content);
                current = Some(Section::ActionInput);
                seen.push(Section::ActionInput);
                content = vec![rest.trim().to_owned()];
                continue;
            }
        } else if let Some(rest) = line.strip_prefix("Action:") {
            if !seen.contains(&Section::Action) {
                flush(&mut parsed, current, &content);
                current = Some(Section::Action);
                seen.push(Section::Action);
                content = vec![rest.trim().to_owned()];
                continue;
            }
        }

        // Continuation of the open section (or ignorable preamble).
        if current.is_some() {
            content.push(raw_line.trim_end().to_owned());
        }
    }

    match current {
        Some(Section::FinalAnswer) => {
            while content.last().is_some_and(|l| l.trim().is_empty()) {
                content.pop();
            }
            parsed.final_answer = Some(content.join("\n").trim().to_owned());
            parsed.is_complete = true;
        }
        other => flush(&mut parsed, other, &content),
    }
    parsed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Action conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert `Action` / `Action Input` into a tool request.
///
/// The action must be `"<server>.<tool>"`. The input is tried as JSON, then
/// `key: value` pairs, then `key=value` pairs, then a single `{input: raw}`.
pub fn action_to_tool_request(action: &str, action_input: &str) -> Result<ToolRequest> {
    let action = action.trim();
    if action.is_empty() {
        return Err(Error::Other("Action cannot be empty".into()));
    }
    let Some((server, tool)) = action.split_once('.') else {
        return Err(Error::Other(format!(
            "Action must be in format 'server.tool', got: {action}"
        )));
    };

    Ok(ToolRequest {
        server: server.to_owned(),
        tool: tool.to_owned(),
        parameters: parse_action_input(action_input.trim()),
        reason: format!("ReAct Action: {action}"),
    })
}

fn parse_action_input(input: &str) -> Value {
    if input.is_empty() {
        return Value::Object(Map::new());
    }

    // JSON first.
    if input.starts_with('{') {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(input) {
            return value;
        }
    }

    // `key: value` / `key=value` pairs, comma separated.
    let mut params = Map::new();
    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once(':').filter(|_| !part.contains('=')) {
            params.insert(key.trim().to_owned(), Value::String(value.trim().to_owned()));
        } else if let Some((key, value)) = part.split_once('=') {
            params.insert(key.trim().to_owned(), Value::String(value.trim().to_owned()));
        } else {
            // Unstructured part: fall back to the whole input verbatim.
            params.clear();
            break;
        }
    }
    if params.is_empty() {
        let mut fallback = Map::new();
        fallback.insert("input".into(), Value::String(input.to_owned()));
        return Value::Object(fallback);
    }
    Value::Object(params)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Render tool outcomes as the observation text placed on the conversation.
/// Structured results pretty-print as JSON; plain text stays raw.
pub fn format_observation(outcomes: &[ToolOutcome]) -> String {
    if outcomes.is_empty() {
        return "No data returned from the action.".to_owned();
    }
    let mut lines = Vec::new();
    for outcome in outcomes {
        let prefix = format!("{}.{}", outcome.server, outcome.tool);
        match (&outcome.result, &outcome.error) {
            (Some(Value::String(text)), _) => lines.push(format!("{prefix}: {text}")),
            (Some(value), _) => {
                let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                lines.push(format!("{prefix}: {pretty}"));
            }
            (None, Some(error)) => lines.push(format!("{prefix} error: {error}")),
            (None, None) => lines.push(format!("{prefix}: Action completed but no specific data returned.")),
        }
    }
    lines.join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Final-analysis extraction (shared by the ReAct controllers)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract a clean stage summary from a full ReAct transcript.
///
/// Tie-break order: `Final Answer` block, then the first line matching a
/// completion pattern (text after its colon), then an incomplete pattern
/// (reported as cut off by iteration limits), then the fallback extractor,
/// then the fallback message.
pub fn extract_final_analysis(
    transcript: &str,
    completion_patterns: &[&str],
    incomplete_patterns: &[&str],
    fallback_extractor: impl Fn(&[&str]) -> Option<String>,
    fallback_message: &str,
) -> String {
    if transcript.is_empty() {
        return fallback_message.to_owned();
    }
    let lines: Vec<&str> = transcript.lines().collect();

    // Final Answer block first.
    let mut collected: Vec<&str> = Vec::new();
    let mut collecting = false;
    for line in &lines {
        if let Some(rest) = line.strip_prefix("Final Answer:") {
            collecting = true;
            let rest = rest.trim();
            if !rest.is_empty() {
                collected.push(rest);
            }
            continue;
        }
        if collecting {
            if line.starts_with("Thought:") || line.starts_with("Action:") || line.starts_with("Observation:") {
                break;
            }
            collected.push(line);
        }
    }
    while collected.last().is_some_and(|l| l.trim().is_empty()) {
        collected.pop();
    }
    if !collected.is_empty() {
        return collected.join("\n");
    }

    for line in &lines {
        for pattern in completion_patterns {
            if let Some(pos) = line.find(pattern) {
                let after = line[pos + pattern.len()..].trim_start_matches(':').trim();
                if !after.is_empty() {
                    return after.to_owned();
                }
            }
        }
    }

    for line in &lines {
        for pattern in incomplete_patterns {
            if line.starts_with(pattern) {
                return format!("{} due to iteration limits", pattern.trim_end_matches(':'));
            }
        }
    }

    if let Some(extracted) = fallback_extractor(&lines) {
        return extracted;
    }
    fallback_message.to_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
