//! Redaction of sensitive values before a payload is echoed back or logged.

use serde_json::{Map, Value};

use redlog_common::REDACTED;

/// Key fragments whose values are never echoed.
const SENSITIVE_KEYS: &[&str] = &[
    "secret",
    "password",
    "passwd",
    "token",
    "credential",
    "private_key",
    "api_key",
    "authorization",
];

fn is_sensitive(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|s| key_lower.contains(s))
}

/// Replace the value of every sensitive key with `[REDACTED]`, recursively.
pub fn redact_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive(key) {
                    redacted.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive).collect()),
        _ => value.clone(),
    }
}
