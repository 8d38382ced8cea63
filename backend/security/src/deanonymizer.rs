//! Deanonymizer: restores real identities in text meant for a human.
//!
//! Resolution is fail-open: a token without a reverse entry is left as it
//! is. Every distinct token that is actually substituted is audited exactly
//! once per call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lmsguard_logging::AuditLogger;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

use crate::cache::{AnonymizationCache, OriginalIdentity, TOKEN_PREFIX};

// Suffixes are 8 hex digits, or 16 after a collision fallback.
static DISPLAY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bStudent_([0-9a-f]{8}(?:[0-9a-f]{8})?)\b").unwrap());
static EMAIL_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bstudent_([0-9a-f]{8}(?:[0-9a-f]{8})?)@anon\.invalid\b").unwrap());

/// Audit method recorded for each resolved token.
pub const DEANONYMIZE_METHOD: &str = "DEANONYMIZE";

pub struct Deanonymizer {
    cache: Arc<AnonymizationCache>,
    audit: Arc<AuditLogger>,
    enabled: bool,
}

impl Deanonymizer {
    pub fn new(cache: Arc<AnonymizationCache>, audit: Arc<AuditLogger>, enabled: bool) -> Self {
        Self { cache, audit, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Replace display and e-mail tokens by the stored originals.
    pub fn deanonymize_text(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }

        let suffixes: BTreeSet<&str> = DISPLAY_TOKEN
            .captures_iter(text)
            .chain(EMAIL_TOKEN.captures_iter(text))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        if suffixes.is_empty() {
            return text.to_string();
        }

        let mut resolved: BTreeMap<&str, OriginalIdentity> = BTreeMap::new();
        let mut unresolved = 0usize;
        for suffix in suffixes {
            match self.cache.lookup(&format!("{TOKEN_PREFIX}{suffix}")) {
                Some(original) => {
                    resolved.insert(suffix, original);
                }
                None => unresolved += 1,
            }
        }
        if unresolved > 0 {
            debug!(unresolved, "[Deanonymization] Tokens without a reverse entry left as-is");
        }
        if resolved.is_empty() {
            return text.to_string();
        }

        // E-mail form first so the display pass never sees a half-replaced address.
        let mut substituted: BTreeSet<String> = BTreeSet::new();
        let text = EMAIL_TOKEN.replace_all(text, |caps: &Captures| {
            replacement(&resolved, &mut substituted, caps, |original| &original.email)
        });
        let text = DISPLAY_TOKEN.replace_all(&text, |caps: &Captures| {
            replacement(&resolved, &mut substituted, caps, |original| &original.name)
        });

        for suffix in &substituted {
            self.audit
                .log_data_access(DEANONYMIZE_METHOD, &format!("{TOKEN_PREFIX}{suffix}"), "resolved");
        }
        text.into_owned()
    }
}

/// Stored field for the captured token; the match itself when the field is blank.
fn replacement(
    resolved: &BTreeMap<&str, OriginalIdentity>,
    substituted: &mut BTreeSet<String>,
    caps: &Captures,
    field: impl Fn(&OriginalIdentity) -> &String,
) -> String {
    let suffix = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
    match resolved.get(suffix).map(&field) {
        Some(value) if !value.trim().is_empty() => {
            substituted.insert(suffix.to_string());
            value.clone()
        }
        _ => caps[0].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymizer::Anonymizer;
    use crate::cache::{synthetic_email, RealId};
    use lmsguard_config::AuditConfig;
    use serde_json::json;
    use std::io::{self, Write};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

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
        fn events(&self) -> Vec<serde_json::Value> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    struct Fixture {
        anonymizer: Anonymizer,
        deanonymizer: Deanonymizer,
        mirror: Capture,
    }

    fn fixture(enabled: bool) -> Fixture {
        let cache = Arc::new(AnonymizationCache::new());
        let audit = Arc::new(AuditLogger::new());
        let mirror = Capture::default();
        let config = AuditConfig {
            log_access_events: Some(true),
            log_execution_events: Some(false),
            log_dir: None,
        };
        audit.init_with_mirror(&config, Box::new(mirror.clone()));
        Fixture {
            anonymizer: Anonymizer::new(Arc::clone(&cache), true),
            deanonymizer: Deanonymizer::new(cache, audit, enabled),
            mirror,
        }
    }

    fn anonymize(f: &Fixture, id: i64, name: &str, email: &str) -> String {
        let out = f
            .anonymizer
            .anonymize_user_data(json!({"id": id, "name": name, "email": email}));
        out["name"].as_str().unwrap().to_string()
    }

    #[test]
    fn round_trip_restores_name_and_email() {
        let f = fixture(true);
        let token = anonymize(&f, 1, "Jane Doe", "jane@school.edu");
        let text = format!("{token} ({}) scored 92. Well done {token}!", synthetic_email(&token));

        let restored = f.deanonymizer.deanonymize_text(&text);
        assert_eq!(restored, "Jane Doe (jane@school.edu) scored 92. Well done Jane Doe!");
    }

    #[test]
    fn one_audit_event_per_distinct_resolved_token() {
        let f = fixture(true);
        let jane = anonymize(&f, 1, "Jane Doe", "jane@school.edu");
        let sam = anonymize(&f, 2, "Sam Lee", "sam@school.edu");
        let text = format!("{jane}, {jane}, {sam} and {}", synthetic_email(&jane));

        f.deanonymizer.deanonymize_text(&text);
        let events = f.mirror.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e["event_type"] == "data_access"));
        assert!(events.iter().all(|e| e["method"] == DEANONYMIZE_METHOD));
        let endpoints: BTreeSet<_> = events.iter().map(|e| e["endpoint"].as_str().unwrap()).collect();
        assert!(endpoints.contains(jane.as_str()));
        assert!(endpoints.contains(sam.as_str()));
    }

    #[test]
    fn unknown_tokens_are_left_unchanged() {
        let f = fixture(true);
        let text = "Student_deadbeef wrote to student_deadbeef@anon.invalid";
        assert_eq!(f.deanonymizer.deanonymize_text(text), text);
        assert!(f.mirror.events().is_empty());
    }

    #[test]
    fn mixed_resolution_is_partial() {
        let f = fixture(true);
        let token = anonymize(&f, 1, "Jane Doe", "");
        let text = format!("{token} and Student_00000000");
        assert_eq!(f.deanonymizer.deanonymize_text(&text), "Jane Doe and Student_00000000");
        assert_eq!(f.mirror.events().len(), 1);
    }

    #[test]
    fn blank_stored_field_keeps_token() {
        let f = fixture(true);
        let token = anonymize(&f, 1, "Jane Doe", "");
        let email = synthetic_email(&token);
        assert_eq!(f.deanonymizer.deanonymize_text(&email), email);
        assert!(f.mirror.events().is_empty());

        let text = format!("{token} <{email}>");
        assert_eq!(f.deanonymizer.deanonymize_text(&text), format!("Jane Doe <{email}>"));
        assert_eq!(f.mirror.events().len(), 1);
    }

    #[test]
    fn long_suffix_tokens_resolve() {
        let f = fixture(true);
        f.anonymizer
            .cache()
            .squat_short_tokens(&RealId::from(1), &RealId::from(999));
        let token = anonymize(&f, 1, "Jane Doe", "jane@school.edu");
        assert_eq!(token.len(), TOKEN_PREFIX.len() + 16);

        let text = format!("{token} ({})", synthetic_email(&token));
        assert_eq!(f.deanonymizer.deanonymize_text(&text), "Jane Doe (jane@school.edu)");
        assert_eq!(f.mirror.events().len(), 1);
    }

    #[test]
    fn disabled_is_identity() {
        let f = fixture(false);
        let token = anonymize(&f, 1, "Jane Doe", "jane@school.edu");
        assert_eq!(f.deanonymizer.deanonymize_text(&token), token);
        assert!(f.mirror.events().is_empty());
    }

    #[test]
    fn token_boundaries_are_respected() {
        let f = fixture(true);
        let token = anonymize(&f, 1, "Jane Doe", "jane@school.edu");
        let glued = format!("X{token}0");
        assert_eq!(f.deanonymizer.deanonymize_text(&glued), glued);
        assert!(f.anonymizer.cache().token_for(&RealId::from(1)).is_some());
    }
}
