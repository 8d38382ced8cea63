//! Environment-variable overrides, applied on top of the config file.
//!
//! Environment always wins over the file. Malformed booleans and integers are
//! logged and ignored so the file value (or the default) stays in effect.

use std::collections::HashMap;

use tracing::warn;

use crate::lenient::{parse_bool, parse_u64};
use crate::schema::{
    ApiConfig, AuditConfig, GuardConfig, LoggingConfig, PrivacyConfig, SandboxConfig,
};

/// Apply overrides from the process environment.
pub fn apply_process_env_overrides(config: GuardConfig) -> GuardConfig {
    apply_env_overrides(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_env_overrides(mut config: GuardConfig, env: &HashMap<String, String>) -> GuardConfig {
    let get = |name: &str| env.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

    {
        let api = config.api.get_or_insert_with(ApiConfig::default);
        if let Some(token) = get("CANVAS_API_TOKEN") {
            api.token = Some(token.to_string());
        }
        if let Some(url) = get("CANVAS_API_URL") {
            api.base_url = Some(url.to_string());
        }
    }

    {
        let privacy = config.privacy.get_or_insert_with(PrivacyConfig::default);
        override_bool(&mut privacy.enable_anonymization, get("ENABLE_DATA_ANONYMIZATION"), "ENABLE_DATA_ANONYMIZATION");
        override_bool(&mut privacy.enable_deanonymization, get("ENABLE_DEANONYMIZATION"), "ENABLE_DEANONYMIZATION");
        if let Some(key) = get("ANONYMIZATION_KEY") {
            privacy.anonymization_key = Some(key.to_string());
        }
    }

    {
        let audit = config.audit.get_or_insert_with(AuditConfig::default);
        override_bool(&mut audit.log_access_events, get("LOG_ACCESS_EVENTS"), "LOG_ACCESS_EVENTS");
        override_bool(&mut audit.log_execution_events, get("LOG_EXECUTION_EVENTS"), "LOG_EXECUTION_EVENTS");
        if let Some(dir) = get("AUDIT_LOG_DIR") {
            audit.log_dir = Some(dir.to_string());
        }
    }

    {
        let logging = config.logging.get_or_insert_with(LoggingConfig::default);
        override_bool(&mut logging.redact_pii, get("LOG_REDACT_PII"), "LOG_REDACT_PII");
        if let Some(level) = get("LOG_LEVEL") {
            logging.level = Some(level.to_string());
        }
    }

    {
        let sandbox = config.sandbox.get_or_insert_with(SandboxConfig::default);
        override_bool(&mut sandbox.enabled, get("SANDBOX_ENABLED"), "SANDBOX_ENABLED");
        override_bool(
            &mut sandbox.block_outbound_network,
            get("SANDBOX_BLOCK_OUTBOUND_NETWORK"),
            "SANDBOX_BLOCK_OUTBOUND_NETWORK",
        );
        override_u64(&mut sandbox.cpu_limit_secs, get("SANDBOX_CPU_LIMIT_SECS"), "SANDBOX_CPU_LIMIT_SECS");
        override_u64(&mut sandbox.memory_limit_mb, get("SANDBOX_MEMORY_LIMIT_MB"), "SANDBOX_MEMORY_LIMIT_MB");
        override_u64(&mut sandbox.timeout_secs, get("SANDBOX_TIMEOUT_SECS"), "SANDBOX_TIMEOUT_SECS");
        if let Some(mode) = get("SANDBOX_MODE") {
            sandbox.mode = Some(mode.to_ascii_lowercase());
        }
        if let Some(hosts) = get("SANDBOX_ALLOWED_HOSTS") {
            sandbox.allowed_hosts = Some(
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        }
        if let Some(runtime) = get("SANDBOX_RUNTIME") {
            sandbox.runtime = Some(runtime.to_string());
        }
        if let Some(image) = get("SANDBOX_CONTAINER_IMAGE") {
            sandbox.container_image = Some(image.to_string());
        }
    }

    config
}

fn override_bool(slot: &mut Option<bool>, raw: Option<&str>, var: &str) {
    let Some(raw) = raw else { return };
    match parse_bool(raw) {
        Some(value) => *slot = Some(value),
        None => warn!(var, "Malformed boolean in environment; keeping configured value"),
    }
}

fn override_u64(slot: &mut Option<u64>, raw: Option<&str>, var: &str) {
    let Some(raw) = raw else { return };
    match parse_u64(raw) {
        Some(value) => *slot = Some(value),
        None => warn!(var, "Malformed integer in environment; keeping configured value"),
    }
}
