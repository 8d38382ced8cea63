//! Diagnostic log helpers that sanitize their structured context.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::redact::{redact_sensitive_data, ContextSanitizer};

/// Emits diagnostic lines through `tracing` with a sanitized `context` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticLog {
    sanitizer: ContextSanitizer,
}

impl DiagnosticLog {
    pub fn new(sanitizer: ContextSanitizer) -> Self {
        Self { sanitizer }
    }

    pub fn sanitizer(&self) -> &ContextSanitizer {
        &self.sanitizer
    }

    /// Render the context as a compact JSON string after sanitization.
    pub fn render_context(&self, context: &Value) -> String {
        self.sanitizer.sanitize_value(context).to_string()
    }

    pub fn info(&self, message: &str, context: &Value) {
        info!(context = %self.render_context(context), "{message}");
    }

    pub fn warn(&self, message: &str, context: &Value) {
        warn!(context = %self.render_context(context), "{message}");
    }

    /// Log an error; the error text is scrubbed of tokens, emails and phone numbers.
    pub fn error(&self, message: &str, err: &dyn std::fmt::Display, context: &Value) {
        let detail = if self.sanitizer.is_enabled() {
            redact_sensitive_data(&err.to_string())
        } else {
            err.to_string()
        };
        error!(error = %detail, context = %self.render_context(context), "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rendered_context_is_sanitized() {
        let log = DiagnosticLog::default();
        let rendered = log.render_context(&json!({"email": "jane@school.edu", "course_id": 987654}));
        assert!(!rendered.contains("jane@school.edu"));
        assert!(rendered.contains("***7654"));
    }

    #[test]
    fn disabled_sanitizer_renders_raw() {
        let log = DiagnosticLog::new(ContextSanitizer::new(false));
        let rendered = log.render_context(&json!({"email": "jane@school.edu"}));
        assert!(rendered.contains("jane@school.edu"));
    }
}
