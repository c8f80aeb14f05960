//! Output masking for tool results.
//!
//! When a server config enables masking, every tool result passes through
//! [`DataMasker::apply`] before it reaches the agent. Masking is a pure
//! function of the server config and the raw result.

use regex::Regex;
use serde_json::Value;

use tarsy_domain::config::MaskingConfig;

const MASK: &str = "***MASKED***";

pub struct DataMasker {
    masked_fields: Vec<String>,
    patterns: Vec<Regex>,
}

impl DataMasker {
    /// Compile the masker from a server's masking config. Invalid regex
    /// patterns are skipped with a warning rather than disabling masking.
    pub fn new(config: &MaskingConfig) -> Self {
        let patterns = config
            .mask_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "skipping invalid mask pattern");
                    None
                }
            })
            .collect();
        Self {
            masked_fields: config.masked_fields.clone(),
            patterns,
        }
    }

    /// Redact a raw tool result.
    pub fn apply(&self, raw: Value) -> Value {
        self.mask_value(raw)
    }

    fn mask_value(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let masked = map
                    .into_iter()
                    .map(|(k, v)| {
                        if self.masked_fields.iter().any(|f| f == &k) {
                            (k, Value::String(MASK.into()))
                        } else {
                            (k, self.mask_value(v))
                        }
                    })
                    .collect();
                Value::Object(masked)
            }
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.mask_value(v)).collect()),
            Value::String(s) => Value::String(self.mask_string(s)),
            other => other,
        }
    }

    fn mask_string(&self, s: String) -> String {
        let mut out = s;
        for re in &self.patterns {
            out = re.replace_all(&out, MASK).into_owned();
        }
        out
    }
}
