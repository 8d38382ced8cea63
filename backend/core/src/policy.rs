//! Sanitization policy: pure classification of keys and API paths.
//!
//! Shared by the context sanitizer (diagnostic logs), the audit logger
//! (endpoint masking) and the anonymizer (endpoint classification).

/// Marker that replaces the whole value of a PII field.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Mask placed in front of truncated identifiers and over numeric path segments.
pub const MASK: &str = "***";

/// Number of trailing characters kept when an identifier is truncated.
pub const ID_VISIBLE_CHARS: usize = 4;

/// Keys whose values are always fully redacted in diagnostic output.
pub const PII_KEYS: &[&str] = &[
    "user_id",
    "email",
    "name",
    "login_id",
    "sis_user_id",
    "sis_login_id",
    "student_id",
    "value",
    "sortable_name",
    "short_name",
    "display_name",
    "user_name",
    "integration_id",
    "avatar_url",
];

/// Resources whose responses carry student identities.
const IDENTITY_SEGMENTS: &[&str] = &[
    "users",
    "search_users",
    "enrollments",
    "submissions",
    "students",
    "peer_reviews",
    "profile",
];

/// Resources whose top-level records are themselves users.
const USER_RECORD_SEGMENTS: &[&str] = &["users", "search_users", "students", "profile"];

/// Discussion sub-resources that embed participant identities.
const DISCUSSION_IDENTITY_SEGMENTS: &[&str] = &["entries", "replies", "view"];

/// How a key is treated by the sanitization layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldClass {
    /// Personal data: the value is replaced by [`REDACTION_MARKER`].
    Pii,
    /// Generic identifier (`*_id`): the value is truncated to its last characters.
    Identifier,
    /// Anything else passes through.
    Ordinary,
}

/// Classify a context key. PII membership wins over the `_id` suffix rule.
pub fn classify_key(key: &str) -> FieldClass {
    let lower = key.to_ascii_lowercase();
    if PII_KEYS.contains(&lower.as_str()) {
        FieldClass::Pii
    } else if lower.ends_with("_id") {
        FieldClass::Identifier
    } else {
        FieldClass::Ordinary
    }
}

/// Decide whether the response of an API path contains identity-bearing records.
///
/// Only the resource the path ends in counts: `/courses/1/users/7` is
/// identity-bearing, `/users/7/courses` is not. Accepts bare paths, rooted
/// paths, versioned paths (`/api/v1/...`) and full URLs. Query strings are ignored.
pub fn is_identity_endpoint(endpoint: &str) -> bool {
    let segments = path_segments(endpoint);
    if is_own_profile(&segments) {
        return false;
    }
    let Some(resource) = resource_segment(&segments) else {
        return false;
    };
    if IDENTITY_SEGMENTS.contains(&resource) {
        return true;
    }
    DISCUSSION_IDENTITY_SEGMENTS.contains(&resource) && segments.contains(&"discussion_topics")
}

/// Whether the top-level records of an API path's response are user objects
/// (as opposed to enrollments or submissions that embed a `user`).
pub fn lists_user_records(endpoint: &str) -> bool {
    let segments = path_segments(endpoint);
    !is_own_profile(&segments)
        && resource_segment(&segments).is_some_and(|r| USER_RECORD_SEGMENTS.contains(&r))
}

// The caller's own profile is not student data.
fn is_own_profile(segments: &[&str]) -> bool {
    segments.first() == Some(&"users") && segments.get(1) == Some(&"self")
}

/// Last segment that names a resource rather than an identifier.
fn resource_segment<'a>(segments: &[&'a str]) -> Option<&'a str> {
    segments.iter().rev().copied().find(|s| !is_id_segment(s))
}

// Numeric ids, `self` and SIS-style `sis_user_id:abc` references.
fn is_id_segment(segment: &str) -> bool {
    segment == "self" || segment.contains(':') || segment.bytes().all(|b| b.is_ascii_digit())
}

/// Replace every all-digit path segment with [`MASK`], preserving everything else.
///
/// `/courses/12345/users/678` becomes `/courses/***/users/***`.
pub fn mask_numeric_segments(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
                MASK
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn path_segments(endpoint: &str) -> Vec<&str> {
    let without_scheme = match endpoint.find("://") {
        Some(idx) => {
            let rest = &endpoint[idx + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("")
        }
        None => endpoint,
    };
    let path = without_scheme
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();

    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() >= 2 && segments[0] == "api" && segments[1] == "v1" {
        segments.drain(..2);
    }
    segments
}
