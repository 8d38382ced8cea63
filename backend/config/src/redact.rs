//! Config redaction: safe-to-log config snapshots with secrets masked.

use serde_json::Value;

use crate::schema::GuardConfig;

/// Keys whose string values are secrets.
static SECRET_KEYS: &[&str] = &[
    "token",
    "apiToken",
    "api_token",
    "apiKey",
    "api_key",
    "accessToken",
    "access_token",
    "anonymizationKey",
    "anonymization_key",
    "secret",
    "password",
];

/// Serialize and redact a config, replacing secrets with `"****"` hints.
pub fn redact_config(config: &GuardConfig) -> Value {
    match serde_json::to_value(config) {
        Ok(value) => redact(&value),
        Err(_) => Value::Null,
    }
}

/// Redact a JSON value tree; the result is safe to log or print.
pub fn redact(value: &Value) -> Value {
    redact_recursive(value, "")
}

fn is_secret_key(key: &str) -> bool {
    SECRET_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key))
}

fn redact_recursive(value: &Value, key: &str) -> Value {
    match value {
        Value::String(s) if is_secret_key(key) && !s.is_empty() => {
            // Never reveal more than a prefix of a long secret.
            let hint = if s.chars().count() > 12 {
                format!("{}****", s.chars().take(4).collect::<String>())
            } else {
                "****".to_string()
            };
            Value::String(hint)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact_recursive(v, key)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_recursive(v, k)))
                .collect(),
        ),
        other => other.clone(),
    }
}
