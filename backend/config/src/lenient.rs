//! Lenient scalar parsing: malformed values fall back to the documented default.
//!
//! Used both by the YAML schema (`deserialize_with`) and by environment overrides.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Parse a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off` (any case).
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a non-negative integer, tolerating surrounding whitespace.
pub fn parse_u64(raw: &str) -> Option<u64> {
    raw.trim().parse().ok()
}

pub fn opt_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        let parsed = match &value {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_bool(s),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            Value::Null => return None,
            _ => None,
        };
        if parsed.is_none() {
            warn!(value = %value, "Malformed boolean in config; using default");
        }
        parsed
    }))
}

pub fn opt_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| {
        let parsed = match &value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => parse_u64(s),
            Value::Null => return None,
            _ => None,
        };
        if parsed.is_none() {
            warn!(value = %value, "Malformed integer in config; using default");
        }
        parsed
    }))
}
