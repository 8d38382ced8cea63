//! Trust context: the one object that owns every piece of trust-boundary state.
//!
//! Built once at startup from the prepared configuration and shared by
//! reference (`Arc<TrustContext>`) with the HTTP collaborator and the tools.

use std::sync::Arc;

use lmsguard_config::GuardConfig;
use lmsguard_logging::{sanitize_url, AuditLogger, ContextSanitizer, DiagnosticLog};
use lmsguard_sandbox::{ExecutionOutcome, SandboxRunner};
use lmsguard_security::{AnonymizationCache, Anonymizer, CacheStats, Deanonymizer};
use serde_json::{json, Map, Value};
use tracing::debug;

pub struct TrustContext {
    config: GuardConfig,
    cache: Arc<AnonymizationCache>,
    audit: Arc<AuditLogger>,
    diagnostics: DiagnosticLog,
    anonymizer: Anonymizer,
    deanonymizer: Deanonymizer,
    runner: SandboxRunner,
}

impl TrustContext {
    /// Build the context and initialize the audit sinks (file + stderr mirror).
    pub fn new(config: GuardConfig) -> Self {
        let audit = Arc::new(AuditLogger::new());
        audit.init(&config.audit());
        Self::with_audit(config, audit)
    }

    /// Build the context around an audit logger the caller already initialized.
    pub fn with_audit(config: GuardConfig, audit: Arc<AuditLogger>) -> Self {
        let privacy = config.privacy();
        let cache = Arc::new(AnonymizationCache::from_config(&privacy));
        let sanitizer = ContextSanitizer::from_config(&config.logging());

        Self {
            anonymizer: Anonymizer::new(Arc::clone(&cache), privacy.anonymization_enabled()),
            deanonymizer: Deanonymizer::new(
                Arc::clone(&cache),
                Arc::clone(&audit),
                privacy.deanonymization_enabled(),
            ),
            runner: SandboxRunner::from_config(&config, Arc::clone(&audit)),
            diagnostics: DiagnosticLog::new(sanitizer),
            cache,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn runner(&self) -> &SandboxRunner {
        &self.runner
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Entry point for the HTTP collaborator: record the access, then
    /// anonymize the payload if the endpoint carries identities.
    pub fn filter_api_response(
        &self,
        method: &str,
        endpoint: &str,
        status: &str,
        payload: Value,
    ) -> Value {
        self.audit.log_data_access(method, endpoint, status);
        debug!(method, endpoint = %sanitize_url(endpoint), status, "[Trust] API response received");
        self.anonymize_response_data(payload, endpoint)
    }

    pub fn anonymize_response_data(&self, payload: Value, endpoint: &str) -> Value {
        self.anonymizer.anonymize_response_data(payload, endpoint)
    }

    /// Restore real identities in text shown to a human.
    pub fn present_to_human(&self, text: &str) -> String {
        self.deanonymizer.deanonymize_text(text)
    }

    pub fn sanitize_context(&self, context: &Map<String, Value>) -> Map<String, Value> {
        self.diagnostics.sanitizer().sanitize_context(context)
    }

    /// Drop every anonymization mapping.
    pub fn clear_caches(&self) {
        self.cache.clear();
        self.diagnostics
            .info("Anonymization caches cleared", &json!({"component": "trust"}));
    }

    pub async fn execute_code(&self, code: &str) -> ExecutionOutcome {
        self.runner.execute(code).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lmsguard_config::{ApiConfig, AuditConfig, PrivacyConfig, SandboxConfig};
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    pub(crate) struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        pub(crate) fn events(&self) -> Vec<Value> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    pub(crate) fn config(anonymize: bool) -> GuardConfig {
        GuardConfig {
            api: Some(ApiConfig {
                base_url: Some("https://canvas.example.com/api/v1".into()),
                token: Some("1234~abcdefghijklmnopqrstuvwxyz".into()),
            }),
            privacy: Some(PrivacyConfig {
                enable_anonymization: Some(anonymize),
                ..Default::default()
            }),
            sandbox: Some(SandboxConfig {
                runtime: Some("sh".into()),
                block_outbound_network: Some(false),
                timeout_secs: Some(10),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub(crate) fn context(anonymize: bool) -> (TrustContext, Capture) {
        let audit = Arc::new(AuditLogger::new());
        let mirror = Capture::default();
        audit.init_with_mirror(
            &AuditConfig {
                log_access_events: Some(true),
                log_execution_events: Some(true),
                log_dir: None,
            },
            Box::new(mirror.clone()),
        );
        (TrustContext::with_audit(config(anonymize), audit), mirror)
    }

    fn roster() -> Value {
        json!([
            {"id": 101, "name": "Jane Doe", "email": "jane@school.edu"},
            {"id": 102, "name": "Sam Lee", "email": "sam@school.edu"},
        ])
    }

    #[test]
    fn identity_payloads_are_anonymized_and_access_logged() {
        let (ctx, mirror) = context(true);
        let out = ctx.filter_api_response("GET", "/api/v1/courses/12345/users", "200", roster());

        assert!(out[0]["name"].as_str().unwrap().starts_with("Student_"));
        assert_eq!(out[0]["id"], 101);
        assert!(!out.to_string().contains("jane@school.edu"));

        let events = mirror.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["event_type"], "data_access");
        assert_eq!(events[0]["endpoint"], "/api/v1/courses/***/users");
        assert_eq!(ctx.cache_stats().reverse, 2);
    }

    #[test]
    fn anonymization_off_passes_payload_through() {
        let (ctx, mirror) = context(false);
        let out = ctx.filter_api_response("GET", "/courses/1/users", "200", roster());
        assert_eq!(out, roster());
        assert_eq!(mirror.events().len(), 1);
    }

    #[test]
    fn human_output_round_trips() {
        let (ctx, mirror) = context(true);
        let out = ctx.filter_api_response("GET", "/courses/1/users", "200", roster());
        let jane = out[0]["name"].as_str().unwrap();
        let text = format!("Top score: {jane} ({})", out[0]["email"].as_str().unwrap());

        assert_eq!(ctx.present_to_human(&text), "Top score: Jane Doe (jane@school.edu)");
        // access + one deanonymization event
        assert_eq!(mirror.events().len(), 2);
    }

    #[test]
    fn clearing_forgets_identities() {
        let (ctx, _) = context(true);
        let out = ctx.filter_api_response("GET", "/courses/1/users", "200", roster());
        let jane = out[0]["name"].as_str().unwrap().to_string();
        ctx.clear_caches();
        assert_eq!(ctx.present_to_human(&jane), jane);
        assert_eq!(ctx.cache_stats(), CacheStats::default());
    }

    #[test]
    fn context_fields_are_sanitized() {
        let (ctx, _) = context(true);
        let fields = json!({"email": "jane@school.edu", "course_id": 1234567});
        let clean = ctx.sanitize_context(fields.as_object().unwrap());
        assert_eq!(clean["email"], "[REDACTED]");
        assert_eq!(clean["course_id"], "***4567");
    }
}
