//! List column codec.
//!
//! Facts, concepts and file lists are persisted as JSON arrays. This pair is
//! the only place that turns them back and forth; decoding never fails.

use serde_json::Value;

/// Serialize a list column.
pub fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a list column. NULL, blank or malformed input yields an empty list.
pub fn decode_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<Value>>(raw) {
        Ok(values) => values
            .into_iter()
            .filter_map(|value| match value {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Conversion failure for an enum-typed text column.
pub(crate) fn invalid_column(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}
