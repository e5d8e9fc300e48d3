use std::sync::LazyLock;

use serde_json::Value;
use uuid::Uuid;

use crate::Document;

/// Per-process node id for the time-based uuids. Random rather than a MAC
/// address so that ids from different processes cannot collide.
static NODE_ID: LazyLock<[u8; 6]> = LazyLock::new(rand::random);

/// Generate a fresh opaque id: a 128-bit time-based uuid (v1) rendered as
/// 32 lowercase hex characters.
pub fn new_hex_id() -> String {
    Uuid::now_v1(&NODE_ID).simple().to_string()
}

/// Extract an id from either an id string or a record carrying an `id` key.
///
/// Scalars are coerced to their string form; anything else has no id.
pub fn extract_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("id").and_then(scalar_to_string),
        other => scalar_to_string(other),
    }
}

/// Coerce a document's `id` to its string form in place.
pub fn coerce_id(doc: &mut Document) {
    let Some(id) = doc.get("id") else {
        return;
    };
    if id.is_string() {
        return;
    }
    if let Some(s) = scalar_to_string(id) {
        doc.insert("id".to_owned(), Value::String(s));
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
