//! Decoding of the native API's list payloads.
//!
//! Depending on the proxy version a collection endpoint answers either with
//! an array of items carrying a `name` field or with an object keyed by name.
//! Both shapes decode to the same name-keyed [`ConfigMap`].

use crate::domain::ConfigMap;
use serde_json::Value;
use tracing::debug;

/// Fields that describe runtime state rather than configuration.
const RUNTIME_FIELDS: &[&str] =
    &["status", "using", "usedBy", "provider", "name", "error", "serverStatus"];

/// Decode an array-or-map payload into a name-keyed map.
///
/// Array shape is tried first. Items without a usable name are skipped.
/// In map shape the key is injected as `name` when the item has none.
/// `null` decodes as an empty collection.
pub fn decode_named_items(payload: &[u8]) -> Result<ConfigMap, String> {
    let value: Value = serde_json::from_slice(payload).map_err(|e| format!("invalid JSON: {}", e))?;
    decode_named_value(value)
}

/// Same as [`decode_named_items`] for an already parsed document.
pub fn decode_named_value(value: Value) -> Result<ConfigMap, String> {
    match value {
        Value::Array(items) => from_array(items),
        Value::Object(map) => from_map(map),
        Value::Null => Ok(ConfigMap::new()),
        other => Err(format!("expected an array or an object, got {}", json_kind(&other))),
    }
}

fn from_array(items: Vec<Value>) -> Result<ConfigMap, String> {
    let mut decoded = ConfigMap::new();
    for (index, item) in items.into_iter().enumerate() {
        let Value::Object(item) = item else {
            return Err(format!("item {} is not an object", index));
        };
        let name = match item.get("name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                debug!(index, "Skipping unnamed item");
                continue;
            }
        };
        decoded.insert(name, Value::Object(item));
    }
    Ok(decoded)
}

fn from_map(map: ConfigMap) -> Result<ConfigMap, String> {
    let mut decoded = ConfigMap::new();
    for (key, item) in map {
        let Value::Object(mut item) = item else {
            return Err(format!("item '{}' is not an object", key));
        };
        if !item.get("name").is_some_and(Value::is_string) {
            item.insert("name".to_string(), Value::String(key.clone()));
        }
        decoded.insert(key, Value::Object(item));
    }
    Ok(decoded)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Remove runtime-only fields so the item is valid dynamic configuration.
/// `type` is runtime data on services and middlewares only.
pub fn strip_runtime_fields(items: &mut ConfigMap, strip_type: bool) {
    for item in items.values_mut() {
        if let Value::Object(fields) = item {
            for field in RUNTIME_FIELDS {
                fields.remove(*field);
            }
            if strip_type {
                fields.remove("type");
            }
        }
    }
}
