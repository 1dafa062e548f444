//! Recipient normalization.
//!
//! Historically the `to_email` column accumulated three shapes: a native
//! JSON array, a JSON-encoded array *string*, and a single bare address.
//! Normalization happens once at the lifecycle-API boundary so the
//! dispatcher only ever sees the canonical JSON array, but decoding stays
//! tolerant of the legacy shapes for rows that predate the boundary rule.

use serde::Deserialize;
use serde_json::Value;

/// Coerce a stored `to_email` value into an ordered address list.
///
/// Accepts a JSON array of strings, a JSON string (itself either an address
/// or a nested JSON-encoded array), or a bare address. Blank entries are
/// dropped; order is preserved; the result is stable under re-normalization.
pub fn normalize(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => {
                    let s = s.trim().to_string();
                    (!s.is_empty()).then_some(s)
                }
                _ => None,
            })
            .collect(),
        // A JSON string may wrap another encoding level ("\"[\\\"a@x\\\"]\"")
        // or just be a quoted address.
        Ok(Value::String(inner)) => normalize(&inner),
        Ok(_) => Vec::new(),
        // Not JSON at all: a bare address.
        Err(_) => vec![trimmed.to_string()],
    }
}

/// Canonical storage form: a JSON array of address strings.
pub fn to_storage(recipients: &[String]) -> String {
    serde_json::to_string(recipients).unwrap_or_else(|_| "[]".to_string())
}

/// Request-body shape for recipients: either a JSON array or a string
/// carrying any of the legacy encodings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecipientsInput {
    Many(Vec<String>),
    One(String),
}

impl RecipientsInput {
    /// Collapse to the canonical ordered list.
    pub fn normalize(&self) -> Vec<String> {
        match self {
            RecipientsInput::Many(items) => items
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            RecipientsInput::One(raw) => normalize(raw),
        }
    }
}
