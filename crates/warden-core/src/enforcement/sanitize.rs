//! Payload sanitization at the executor boundary.

use serde_json::Value;

/// Keys that can poison a structural prototype chain when the payload is
/// later consumed on a dynamic host.
const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Strips prototype-poisoning keys from a payload.
///
/// Objects are rebuilt without the forbidden keys, recursing into nested
/// objects and arrays. Scalar payloads pass through untouched.
///
/// ```rust
/// use serde_json::json;
/// use warden_core::enforcement::sanitize_payload;
///
/// let dirty = json!({"__proto__": {"admin": true}, "name": "r-1"});
/// assert_eq!(sanitize_payload(&dirty), json!({"name": "r-1"}));
/// ```
#[must_use]
pub fn sanitize_payload(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !FORBIDDEN_KEYS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), sanitize_payload(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_payload).collect()),
        scalar => scalar.clone(),
    }
}
