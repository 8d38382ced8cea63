//! Anonymizer: rewrites outbound API payloads before they reach the model.
//!
//! Identity-bearing endpoints are walked recursively. Only user-shaped nodes
//! are rewritten: top-level records of user listings, objects under
//! `user`/`author` style keys, and `user_id`/`user_name` style author pairs. Courses,
//! assignments and other records that merely have an `id` and a `name` are
//! left alone. Numeric identifiers are preserved so follow-up API calls keep
//! working.

use std::sync::Arc;

use lmsguard_core::{is_identity_endpoint, lists_user_records};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{synthetic_email, AnonymizationCache, OriginalIdentity, RealId};

/// Fields replaced by the display token. Listed in order of preference for
/// the original name kept in the reverse cache.
const NAME_FIELDS: &[&str] = &["name", "display_name", "short_name", "user_name", "sortable_name"];

/// Fields replaced by the synthetic address.
const EMAIL_FIELDS: &[&str] = &["email", "login_id"];

/// Institutional identifiers that have no anonymous counterpart.
const DROPPED_FIELDS: &[&str] = &["sis_user_id", "sis_login_id", "integration_id", "avatar_url"];

/// Keys whose values are user objects (or lists of them).
const USER_KEYS: &[&str] = &["user", "users", "author", "assessor", "participants", "students"];

/// `(id, display name)` pairs naming a user inline on another record.
const AUTHOR_PAIRS: &[(&str, &str)] = &[("user_id", "user_name"), ("author_id", "author_name")];

pub struct Anonymizer {
    cache: Arc<AnonymizationCache>,
    enabled: bool,
}

impl Anonymizer {
    pub fn new(cache: Arc<AnonymizationCache>, enabled: bool) -> Self {
        Self { cache, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn cache(&self) -> &Arc<AnonymizationCache> {
        &self.cache
    }

    /// Anonymize a single user record. Records without a usable identifier
    /// are returned unchanged.
    pub fn anonymize_user_data(&self, record: Value) -> Value {
        match record {
            Value::Object(mut map) => {
                if let Some(id) = RealId::from_value(map.get("id").unwrap_or(&Value::Null)) {
                    self.rewrite_identity(&mut map, &id);
                }
                Value::Object(map)
            }
            other => other,
        }
    }

    /// Anonymize an API payload according to the endpoint it came from.
    pub fn anonymize_response_data(&self, payload: Value, endpoint: &str) -> Value {
        if !self.enabled || !is_identity_endpoint(endpoint) {
            return payload;
        }
        let mut payload = payload;
        let rewritten = self.walk(&mut payload, lists_user_records(endpoint));
        debug!(rewritten, "[Anonymization] Payload anonymized");
        payload
    }

    /// `is_user` marks values known to be user objects.
    fn walk(&self, value: &mut Value, is_user: bool) -> usize {
        match value {
            Value::Array(items) => items.iter_mut().map(|item| self.walk(item, is_user)).sum(),
            Value::Object(map) => {
                let count = match is_user.then(|| user_key(map)).flatten() {
                    Some(id) => {
                        self.rewrite_identity(map, &id);
                        1
                    }
                    None => self.rewrite_authors(map),
                };
                count
                    + map
                        .iter_mut()
                        .map(|(key, child)| self.walk(child, USER_KEYS.contains(&key.as_str())))
                        .sum::<usize>()
            }
            _ => 0,
        }
    }

    /// Replace inline author names, keyed by the paired user id.
    fn rewrite_authors(&self, map: &mut Map<String, Value>) -> usize {
        let mut count = 0;
        for (id_field, name_field) in AUTHOR_PAIRS {
            if !map.contains_key(*name_field) {
                continue;
            }
            let Some(id) = map.get(*id_field).and_then(RealId::from_value) else {
                continue;
            };
            let original = OriginalIdentity::new(first_text(map, &[*name_field]), "");
            let token = self.cache.anonymize_identity(&id, original);
            map.insert(name_field.to_string(), Value::String(token));
            count += 1;
        }
        count
    }

    fn rewrite_identity(&self, map: &mut Map<String, Value>, id: &RealId) {
        let original = OriginalIdentity {
            name: first_text(map, NAME_FIELDS),
            email: original_email(map),
        };
        let token = self.cache.anonymize_identity(id, original);
        let email = synthetic_email(&token);

        for field in NAME_FIELDS {
            if let Some(slot) = map.get_mut(*field) {
                *slot = Value::String(token.clone());
            }
        }
        for field in EMAIL_FIELDS {
            if let Some(slot) = map.get_mut(*field) {
                *slot = Value::String(email.clone());
            }
        }
        for field in DROPPED_FIELDS {
            map.remove(*field);
        }
    }
}

/// Identifier of a user object that carries something to anonymize.
fn user_key(map: &Map<String, Value>) -> Option<RealId> {
    let has_identity_field = NAME_FIELDS
        .iter()
        .chain(EMAIL_FIELDS)
        .chain(DROPPED_FIELDS)
        .any(|field| map.contains_key(*field));
    if has_identity_field {
        map.get("id").and_then(RealId::from_value)
    } else {
        None
    }
}

fn first_text(map: &Map<String, Value>, fields: &[&str]) -> String {
    fields
        .iter()
        .filter_map(|field| map.get(*field).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// `email` if present, else a `login_id` that looks like an address.
fn original_email(map: &Map<String, Value>) -> String {
    let email = first_text(map, &["email"]);
    if !email.is_empty() {
        return email;
    }
    let login = first_text(map, &["login_id"]);
    if login.contains('@') { login } else { String::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anonymizer() -> Anonymizer {
        Anonymizer::new(Arc::new(AnonymizationCache::new()), true)
    }

    #[test]
    fn user_record_is_rewritten_and_remembered() {
        let anon = anonymizer();
        let out = anon.anonymize_user_data(json!({
            "id": 12345,
            "name": "Jane Doe",
            "email": "jane@school.edu",
        }));

        let token = out["name"].as_str().unwrap().to_string();
        assert!(token.starts_with("Student_"));
        assert_eq!(out["email"], synthetic_email(&token));
        assert_eq!(out["id"], 12345);
        assert_eq!(
            anon.cache().lookup(&token),
            Some(OriginalIdentity::new("Jane Doe", "jane@school.edu"))
        );
    }

    #[test]
    fn record_without_identifier_is_untouched() {
        let anon = anonymizer();
        let record = json!({"name": "Jane Doe", "email": "jane@school.edu"});
        assert_eq!(anon.anonymize_user_data(record.clone()), record);
        assert_eq!(anon.cache().stats().forward, 0);
    }

    #[test]
    fn malformed_identity_fields_do_not_fail() {
        let anon = anonymizer();
        let out = anon.anonymize_user_data(json!({"id": 7, "name": 42, "email": null}));
        let token = anon.cache().token_for(&RealId::from(7)).unwrap();
        assert_eq!(out["name"], token);
        assert!(anon.cache().lookup(&token).is_none());
    }

    #[test]
    fn repeated_anonymization_is_consistent() {
        let anon = anonymizer();
        let a = anon.anonymize_user_data(json!({"id": 1, "name": "A"}));
        let b = anon.anonymize_response_data(
            json!([{"id": "1", "name": "A", "email": "a@school.edu"}]),
            "/courses/3/users",
        );
        assert_eq!(a["name"], b[0]["name"]);
    }

    #[test]
    fn nested_enrollment_users_are_anonymized() {
        let anon = anonymizer();
        let out = anon.anonymize_response_data(
            json!([{
                "id": 900,
                "user_id": 55,
                "type": "StudentEnrollment",
                "user": {
                    "id": 55,
                    "name": "Jane Doe",
                    "sortable_name": "Doe, Jane",
                    "login_id": "jdoe@school.edu",
                    "sis_user_id": "S-1",
                },
            }]),
            "/api/v1/courses/3/enrollments",
        );
        let user = &out[0]["user"];
        let token = anon.cache().token_for(&RealId::from(55)).unwrap();
        assert_eq!(user["name"], token);
        assert_eq!(user["sortable_name"], token);
        assert_eq!(user["login_id"], synthetic_email(&token));
        assert!(user.get("sis_user_id").is_none());
        assert_eq!(out[0]["id"], 900);
        assert_eq!(out[0]["type"], "StudentEnrollment");
        assert_eq!(anon.cache().lookup(&token).unwrap().email, "jdoe@school.edu");
    }

    #[test]
    fn discussion_authors_use_user_id() {
        let anon = anonymizer();
        let out = anon.anonymize_response_data(
            json!({"view": [{"id": 1, "user_id": 77, "user_name": "Sam Lee", "message": "hi"}]}),
            "/courses/3/discussion_topics/9/view",
        );
        let token = anon.cache().token_for(&RealId::from(77)).unwrap();
        assert_eq!(out["view"][0]["user_name"], token);
        assert_eq!(out["view"][0]["message"], "hi");
        assert!(anon.cache().token_for(&RealId::from(1)).is_none());
    }

    #[test]
    fn embedded_assignments_keep_their_names() {
        let anon = anonymizer();
        let users = anon.anonymize_response_data(
            json!([{"id": 7, "name": "Jane Doe"}]),
            "/courses/1/users",
        );
        let token = users[0]["name"].as_str().unwrap().to_string();

        let out = anon.anonymize_response_data(
            json!([{"id": 500, "user_id": 8, "assignment": {"id": 7, "name": "Essay 1"}}]),
            "/courses/1/submissions",
        );
        assert_eq!(out[0]["assignment"]["name"], "Essay 1");
        assert!(anon.cache().token_for(&RealId::from(500)).is_none());
        assert_eq!(anon.cache().lookup(&token).unwrap().name, "Jane Doe");
    }

    #[test]
    fn courses_of_a_user_are_untouched() {
        let anon = anonymizer();
        let payload = json!([{"id": 3, "name": "Biology 101", "course_code": "BIO101"}]);
        assert_eq!(anon.anonymize_response_data(payload.clone(), "/users/7/courses"), payload);
        assert_eq!(anon.cache().stats().forward, 0);
    }

    #[test]
    fn submission_comment_and_reviewer_names_are_anonymized() {
        let anon = anonymizer();
        let out = anon.anonymize_response_data(
            json!([{
                "id": 500,
                "user_id": 8,
                "assignment_id": 2,
                "submission_comments": [{
                    "id": 1,
                    "author_id": 9,
                    "author_name": "Pat Kim",
                    "author": {"id": 9, "display_name": "Pat Kim"},
                    "comment": "nice work",
                }],
                "course": {"id": 1, "name": "Biology 101"},
            }]),
            "/courses/1/assignments/2/submissions",
        );
        let token = anon.cache().token_for(&RealId::from(9)).unwrap();
        let comment = &out[0]["submission_comments"][0];
        assert_eq!(comment["author_name"], token);
        assert_eq!(comment["author"]["display_name"], token);
        assert_eq!(comment["comment"], "nice work");
        assert_eq!(out[0]["course"]["name"], "Biology 101");
        assert_eq!(anon.cache().lookup(&token).unwrap().name, "Pat Kim");

        let reviews = anon.anonymize_response_data(
            json!([{"id": 4, "assessor_id": 9, "assessor": {"id": 9, "display_name": "Pat Kim"}}]),
            "/courses/1/assignments/2/peer_reviews",
        );
        assert_eq!(reviews[0]["assessor"]["display_name"], token);
    }

    #[test]
    fn discussion_participants_are_anonymized() {
        let anon = anonymizer();
        let out = anon.anonymize_response_data(
            json!({
                "participants": [{"id": 77, "display_name": "Sam Lee"}],
                "view": [{"id": 1, "user_id": 77, "message": "hi"}],
            }),
            "/courses/3/discussion_topics/9/view",
        );
        let token = anon.cache().token_for(&RealId::from(77)).unwrap();
        assert_eq!(out["participants"][0]["display_name"], token);
        assert_eq!(out["view"][0]["user_id"], 77);
    }

    #[test]
    fn non_identity_endpoints_pass_through() {
        let anon = anonymizer();
        let payload = json!([{"id": 3, "name": "Biology 101"}]);
        assert_eq!(anon.anonymize_response_data(payload.clone(), "/courses"), payload);
        assert_eq!(anon.anonymize_response_data(payload.clone(), "/users/self"), payload);
        assert_eq!(anon.cache().stats().forward, 0);
    }

    #[test]
    fn disabled_anonymizer_passes_through() {
        let anon = Anonymizer::new(Arc::new(AnonymizationCache::new()), false);
        let payload = json!([{"id": 3, "name": "Jane Doe"}]);
        assert_eq!(anon.anonymize_response_data(payload.clone(), "/courses/1/users"), payload);
    }
}
