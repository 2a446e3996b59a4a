use std::collections::HashMap;

use serde::Deserialize;
use unigate_resilience::RetryPolicy;

/// Top-level model configuration file: `{"models": [...]}`.
#[derive(Debug, Deserialize)]
pub struct ConfigDocument {
    #[serde(default)]
    pub models: Vec<serde_json::Value>,
}

/// Which [`crate::registry`] construction path an entry's `adapter` field
/// selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    OpenaiCompat,
    CustomHttp,
    Process,
    Websocket,
}

fn default_true() -> bool {
    true
}

/// One entry of the `models` sequence. Every field beyond `id`/`adapter` is
/// optional because each adapter variant only consumes a subset.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub adapter: AdapterKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub request_format: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub input_format: Option<String>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// An entry whose only keys are underscore-prefixed is a pure comment and
/// must be ignored entirely, e.g.
/// `{"_comment": "placeholder while vendor ships an API key"}`.
pub fn is_comment_entry(value: &serde_json::Value) -> bool {
    match value.as_object() {
        Some(map) if !map.is_empty() => map.keys().all(|k| k.starts_with('_')),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_entries_are_detected() {
        let comment = serde_json::json!({"_note": "coming soon"});
        assert!(is_comment_entry(&comment));
        let real = serde_json::json!({"id": "m", "_note": "x"});
        assert!(!is_comment_entry(&real));
    }
}
