//! Alert submission types and the in-process duplicate-suppression key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// A validated alert ready for processing.
///
/// `alert_data` is the opaque client payload merged with the top-level
/// submission fields (`runbook`, `severity`, `timestamp`); the engine never
/// schema-binds it and only reads a handful of well-known keys through the
/// projection methods below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub alert_type: String,
    pub alert_data: Value,
}

impl Alert {
    pub fn new(alert_type: impl Into<String>, alert_data: Value) -> Self {
        Self { alert_type: alert_type.into(), alert_data }
    }

    fn data_str(&self, key: &str) -> Option<&str> {
        self.alert_data.get(key).and_then(Value::as_str)
    }

    /// The runbook URL, if the submission carried one.
    pub fn runbook_url(&self) -> Option<&str> {
        self.data_str("runbook").filter(|s| !s.is_empty())
    }

    /// Severity projection used only by response formatting.
    pub fn severity(&self) -> &str {
        self.data_str("severity").unwrap_or("warning")
    }

    /// Environment projection used only by response formatting.
    pub fn environment(&self) -> &str {
        self.data_str("environment").unwrap_or("production")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AlertKey
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Deterministic fingerprint of `(alert_type, canonical(alert_data))`.
///
/// Used only for in-process duplicate suppression; never persisted.
/// Canonicalization relies on `serde_json::Value` objects being key-sorted
/// when rendered, so two submissions differing only in key order collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn from_alert(alert: &Alert) -> Self {
        let canonical = canonical_json(&alert.alert_data);
        let mut hasher = Sha256::new();
        hasher.update(alert.alert_type.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0[..12.min(self.0.len())])
    }
}

/// Render a JSON value with object keys in sorted order at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{inner}}}")
        }
        Value::Array(items) => {
            let inner = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{inner}]")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_is_deterministic() {
        let a = Alert::new("kubernetes", json!({"namespace": "prod", "pod": "api-1"}));
        let b = Alert::new("kubernetes", json!({"pod": "api-1", "namespace": "prod"}));
        assert_eq!(AlertKey::from_alert(&a), AlertKey::from_alert(&b));
    }

    #[test]
    fn key_differs_on_type_and_payload() {
        let a = Alert::new("kubernetes", json!({"namespace": "prod"}));
        let b = Alert::new("aws", json!({"namespace": "prod"}));
        let c = Alert::new("kubernetes", json!({"namespace": "staging"}));
        assert_ne!(AlertKey::from_alert(&a), AlertKey::from_alert(&b));
        assert_ne!(AlertKey::from_alert(&a), AlertKey::from_alert(&c));
    }

    #[test]
    fn canonical_json_sorts_nested_objects() {
        let v = json!({"b": {"z": 1, "a": 2}, "a": [3, {"y": 1, "x": 2}]});
        assert_eq!(
            canonical_json(&v),
            r#"{"a":[3,{"x":2,"y":1}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn projections_with_defaults() {
        let alert = Alert::new("kubernetes", json!({"runbook": "https://ex/rb.md"}));
        assert_eq!(alert.runbook_url(), Some("https://ex/rb.md"));
        assert_eq!(alert.severity(), "warning");
        assert_eq!(alert.environment(), "production");

        let alert = Alert::new("kubernetes", json!({"severity": "critical", "environment": "staging"}));
        assert!(alert.runbook_url().is_none());
        assert_eq!(alert.severity(), "critical");
        assert_eq!(alert.environment(), "staging");
    }

    #[test]
    fn empty_runbook_counts_as_absent() {
        let alert = Alert::new("kubernetes", json!({"runbook": ""}));
        assert!(alert.runbook_url().is_none());
    }
}
