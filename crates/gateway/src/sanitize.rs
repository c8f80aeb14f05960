//! Submission payload sanitization.
//!
//! Applied to every accepted alert before it reaches the engine: unsafe
//! markup substrings are stripped, oversized arrays and strings truncated.

use serde_json::Value;

const MAX_ARRAY_ITEMS: usize = 1000;
const MAX_STRING_CHARS: usize = 10_000;

/// Substrings removed wherever they appear inside string values.
const UNSAFE_SUBSTRINGS: &[&str] = &["<script", "</script", "javascript:", "onerror=", "onload="];

/// Sanitize a payload in place: strip unsafe substrings, cap array sizes at
/// 1 000 items, cap strings at 10 000 characters.
pub fn sanitize_value(value: &mut Value) {
    match value {
        Value::String(s) => {
            let mut cleaned = s.clone();
            let lowered = cleaned.to_lowercase();
            if UNSAFE_SUBSTRINGS.iter().any(|needle| lowered.contains(needle)) {
                cleaned = strip_unsafe(&cleaned);
            }
            if cleaned.chars().count() > MAX_STRING_CHARS {
                cleaned = cleaned.chars().take(MAX_STRING_CHARS).collect();
            }
            *s = cleaned;
        }
        Value::Array(items) => {
            if items.len() > MAX_ARRAY_ITEMS {
                items.truncate(MAX_ARRAY_ITEMS);
            }
            for item in items.iter_mut() {
                sanitize_value(item);
            }
        }
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                sanitize_value(v);
            }
        }
        _ => {}
    }
}

fn strip_unsafe(input: &str) -> String {
    let mut out = input.to_owned();
    for needle in UNSAFE_SUBSTRINGS {
        loop {
            let lowered = out.to_lowercase();
            let Some(pos) = lowered.find(needle) else { break };
            // Remove through the end of the tag when one closes it, else
            // just the needle itself.
            let rest = &out[pos..];
            let end = rest.find('>').map(|i| pos + i + 1).unwrap_or(pos + needle.len());
            out.replace_range(pos..end.min(out.len()), "");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_script_tags() {
        let mut value = json!({"message": "hello <script>alert(1)</script> world"});
        sanitize_value(&mut value);
        let message = value["message"].as_str().unwrap();
        assert!(!message.to_lowercase().contains("<script"));
        assert!(message.contains("hello"));
        assert!(message.contains("world"));
    }

    #[test]
    fn truncates_long_strings() {
        let mut value = json!({"log": "x".repeat(20_000)});
        sanitize_value(&mut value);
        assert_eq!(value["log"].as_str().unwrap().len(), 10_000);
    }

    #[test]
    fn truncates_large_arrays() {
        let mut value = json!({"items": (0..1500).collect::<Vec<i32>>()});
        sanitize_value(&mut value);
        assert_eq!(value["items"].as_array().unwrap().len(), 1000);
    }

    #[test]
    fn sanitizes_nested_structures() {
        let mut value = json!({"outer": {"inner": ["safe", "<script>x</script>"]}});
        sanitize_value(&mut value);
        assert!(!value["outer"]["inner"][1].as_str().unwrap().contains("script"));
    }

    #[test]
    fn leaves_clean_payloads_alone() {
        let mut value = json!({"namespace": "stuck-ns", "count": 3});
        let before = value.clone();
        sanitize_value(&mut value);
        assert_eq!(value, before);
    }
}
