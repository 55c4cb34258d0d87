//! Canonical normalization for loosely-typed claim maps.
//!
//! Identity providers and intermediate token encoders do not agree on how
//! nested claim structures arrive: some deliver clean JSON objects, some
//! re-serialize nested claims as JSON-encoded strings, and most are sloppy
//! about whitespace in map keys. Everything downstream of the trust
//! boundary operates on exactly one canonical shape: nested JSON objects
//! with trimmed string keys. This module is the single place where that
//! conversion happens.

use serde_json::{Map, Value};

/// Recursively normalize a claim value into the canonical shape.
///
/// - Object keys are whitespace-trimmed (last occurrence wins if trimming
///   collapses two keys onto one another).
/// - Arrays and nested objects are normalized recursively.
/// - Scalars pass through unchanged.
#[must_use]
pub fn normalize_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, nested) in map {
                out.insert(key.trim().to_string(), normalize_value(nested));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

/// Normalize a claim that is expected to be a structured (object) value.
///
/// Tolerates the two encodings seen in the wild:
/// - a plain JSON object, normalized recursively;
/// - a JSON-encoded string containing an object (some encoders re-serialize
///   nested claims), parsed and then normalized.
///
/// Returns `None` for anything else (null, scalars, arrays) so callers can
/// fall back to a zero-permission default instead of guessing.
#[must_use]
pub fn normalize_structured_claim(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(normalize_value(value)),
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed @ Value::Object(_)) => Some(normalize_value(&parsed)),
            Ok(_) | Err(_) => {
                tracing::debug!(
                    target: "common.claims",
                    "String-encoded claim did not contain a JSON object"
                );
                None
            }
        },
        _ => None,
    }
}

/// Extract a list of strings from a claim value, dropping non-string items.
///
/// Group claims arrive as JSON arrays of mixed provenance; this keeps only
/// the string members, preserving order.
#[must_use]
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(ToString::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
