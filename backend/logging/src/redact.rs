//! Log Redaction Layer
//!
//! Two concerns: scrubbing secrets out of free text (error messages) and
//! sanitizing the structured context attached to diagnostic log lines.

use std::sync::LazyLock;

use lmsguard_config::LoggingConfig;
use lmsguard_core::{
    classify_key, mask_numeric_segments, FieldClass, ID_VISIBLE_CHARS, MASK, REDACTION_MARKER,
};
use regex::Regex;
use serde_json::{Map, Value};

static TELEPHONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap());
static API_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(sk-[a-zA-Z0-9]{32,})|(Bearer\s+[a-zA-Z0-9\-\._~+/]+=*)|(\b\d{4,}~[A-Za-z0-9]{20,})").unwrap());
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());

/// Redacts sensitive patterns in free text.
pub fn redact_sensitive_data(input: &str) -> String {
    let redacted = API_KEY_RE.replace_all(input, "[REDACTED_TOKEN]");
    let redacted = EMAIL_RE.replace_all(&redacted, "[REDACTED_EMAIL]");
    TELEPHONE_RE.replace_all(&redacted, "[REDACTED_PHONE]").into_owned()
}

/// Mask numeric path segments of a URL, tolerating a `scheme://host` prefix.
/// Query string and fragment are kept as they are.
pub fn sanitize_url(url: &str) -> String {
    let (prefix, rest) = match url.find("://") {
        Some(idx) => {
            let after = &url[idx + 3..];
            let host_end = after
                .find(|c: char| c == '/' || c == '?' || c == '#')
                .unwrap_or(after.len());
            url.split_at(idx + 3 + host_end)
        }
        None => ("", url),
    };
    let path_end = rest.find(|c: char| c == '?' || c == '#').unwrap_or(rest.len());
    let (path, tail) = rest.split_at(path_end);
    format!("{prefix}{}{tail}", mask_numeric_segments(path))
}

/// Sanitizes ad-hoc diagnostic context before it is logged.
///
/// PII keys are replaced wholesale by the redaction marker; `*_id` keys are
/// truncated to their last four characters. A value is never both.
#[derive(Debug, Clone, Copy)]
pub struct ContextSanitizer {
    enabled: bool,
}

impl Default for ContextSanitizer {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl ContextSanitizer {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_config(config: &LoggingConfig) -> Self {
        Self::new(config.redaction_enabled())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Sanitize every key/value pair; nested objects under ordinary keys are
    /// sanitized recursively.
    pub fn sanitize_context(&self, context: &Map<String, Value>) -> Map<String, Value> {
        if !self.enabled {
            return context.clone();
        }
        context
            .iter()
            .map(|(k, v)| (k.clone(), self.sanitize_field(k, v)))
            .collect()
    }

    /// Sanitize an arbitrary JSON value used as log context.
    pub fn sanitize_value(&self, context: &Value) -> Value {
        if !self.enabled {
            return context.clone();
        }
        match context {
            Value::Object(map) => Value::Object(self.sanitize_context(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.sanitize_value(v)).collect()),
            other => other.clone(),
        }
    }

    fn sanitize_field(&self, key: &str, value: &Value) -> Value {
        match classify_key(key) {
            FieldClass::Pii => Value::String(REDACTION_MARKER.to_string()),
            FieldClass::Identifier => truncate_identifier(value),
            FieldClass::Ordinary => self.sanitize_value(value),
        }
    }
}

fn truncate_identifier(value: &Value) -> Value {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Null => return Value::Null,
        other => other.to_string(),
    };
    let len = text.chars().count();
    if len <= ID_VISIBLE_CHARS {
        return value.clone();
    }
    let tail: String = text.chars().skip(len - ID_VISIBLE_CHARS).collect();
    Value::String(format!("{MASK}{tail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmsguard_core::PII_KEYS;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_redaction() {
        let raw = "Sending to +1-555-123-4567 with Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";
        let clean = redact_sensitive_data(raw);
        assert!(!clean.contains("+1-555-123-4567"));
        assert!(!clean.contains("Bearer eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9"));
    }

    #[test]
    fn redacts_emails_and_lms_tokens() {
        let clean = redact_sensitive_data("jane.doe@school.edu used 1234~abcdefghijklmnopqrstuvwxyz");
        assert!(!clean.contains("jane.doe"));
        assert!(!clean.contains("abcdefghij"));
    }

    #[test]
    fn every_pii_key_is_fully_redacted() {
        let sanitizer = ContextSanitizer::default();
        let samples = [json!("Jane Doe"), json!(12345), json!(null), json!({"a": 1}), json!([1, 2])];
        for key in PII_KEYS {
            for sample in &samples {
                let mut map = Map::new();
                map.insert(key.to_string(), sample.clone());
                let out = sanitizer.sanitize_context(&map);
                assert_eq!(out[*key], REDACTION_MARKER, "key {key}");
            }
        }
    }

    #[test]
    fn long_ids_keep_last_four() {
        let sanitizer = ContextSanitizer::default();
        let out = sanitizer.sanitize_context(&ctx(json!({
            "course_id": 1234567,
            "assignment_id": "abcdef",
        })));
        assert_eq!(out["course_id"], "***4567");
        assert_eq!(out["assignment_id"], "***cdef");
    }

    #[test]
    fn short_ids_pass_through() {
        let sanitizer = ContextSanitizer::default();
        let out = sanitizer.sanitize_context(&ctx(json!({"course_id": 42, "term_id": "abcd"})));
        assert_eq!(out["course_id"], 42);
        assert_eq!(out["term_id"], "abcd");
    }

    #[test]
    fn ordinary_keys_pass_and_nested_are_sanitized() {
        let sanitizer = ContextSanitizer::default();
        let out = sanitizer.sanitize_context(&ctx(json!({
            "status": "ok",
            "request": {"email": "a@b.edu", "page": 2},
        })));
        assert_eq!(out["status"], "ok");
        assert_eq!(out["request"]["email"], REDACTION_MARKER);
        assert_eq!(out["request"]["page"], 2);
    }

    #[test]
    fn disabled_sanitizer_is_identity() {
        let sanitizer = ContextSanitizer::new(false);
        let input = ctx(json!({"email": "a@b.edu", "course_id": 1234567}));
        assert_eq!(sanitizer.sanitize_context(&input), input);
    }

    #[test]
    fn sanitize_url_with_host() {
        assert_eq!(
            sanitize_url("https://canvas.example.com/api/v1/courses/12345/users/678?per_page=50"),
            "https://canvas.example.com/api/v1/courses/***/users/***?per_page=50"
        );
        assert_eq!(sanitize_url("/courses/12345/users/678"), "/courses/***/users/***");
        assert_eq!(sanitize_url("https://canvas.example.com"), "https://canvas.example.com");
    }
}
