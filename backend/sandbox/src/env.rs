//! Guest environment builder.
//!
//! Guest code never inherits the server's environment. It gets a short
//! allowlist of operational variables plus the LMS credentials, injected by
//! name.

use std::collections::{BTreeMap, HashMap};

use lmsguard_config::ApiConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Variables forwarded from the host when present.
pub const SAFE_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TZ",
    "TMPDIR",
    "TEMP",
    "TMP",
    "NODE_PATH",
    "SYSTEMROOT",
];

/// Credential variables injected for guest code.
pub const API_TOKEN_VAR: &str = "CANVAS_API_TOKEN";
pub const API_URL_VAR: &str = "CANVAS_API_URL";

static SECRET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(SECRET|TOKEN|PASSW|CREDENTIAL|PRIVATE|API_?KEY|ACCESS_KEY|AUTH|SESSION|COOKIE|DATABASE_URL|DSN)")
        .unwrap()
});

/// True for names that look like they carry a secret.
pub fn is_secret_name(name: &str) -> bool {
    SECRET_NAME.is_match(name)
}

/// Build the guest environment from an explicit host environment.
///
/// Allowlisted names are copied unless they look secret; the API
/// credentials are then injected from configuration.
pub fn build_safe_env(host_env: &HashMap<String, String>, api: &ApiConfig) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = SAFE_ENV_VARS
        .iter()
        .filter(|name| !is_secret_name(name))
        .filter_map(|name| host_env.get(*name).map(|value| (name.to_string(), value.clone())))
        .collect();

    if let Some(token) = api.token.as_deref().filter(|t| !t.is_empty()) {
        env.insert(API_TOKEN_VAR.to_string(), token.to_string());
    }
    if let Some(url) = api.base_url.as_deref().filter(|u| !u.is_empty()) {
        env.insert(API_URL_VAR.to_string(), url.to_string());
    }

    let dropped = host_env.len().saturating_sub(env.len());
    debug!(forwarded = env.len(), dropped, "[Sandbox] Guest environment built");
    env
}
