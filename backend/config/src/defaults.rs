//! Config defaults: applies the documented default values to parsed config.

use tracing::warn;

use crate::io::config_dir;
use crate::schema::{AuditConfig, GuardConfig, LoggingConfig, PrivacyConfig, SandboxConfig};

/// Default guest CPU time ceiling (seconds).
pub const DEFAULT_CPU_LIMIT_SECS: u64 = 30;

/// Default guest memory ceiling (MiB).
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;

/// Default guest wall-clock timeout (seconds).
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Default guest runtime executable.
pub const DEFAULT_RUNTIME: &str = "node";

/// Default image for container-mode execution.
pub const DEFAULT_CONTAINER_IMAGE: &str = "node:20-alpine";

/// Default diagnostic log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: GuardConfig) -> GuardConfig {
    let config = apply_privacy_defaults(config);
    let config = apply_audit_defaults(config);
    let config = apply_logging_defaults(config);
    apply_sandbox_defaults(config)
}

/// Anonymization is opt-in; de-anonymization of human-facing text is on.
fn apply_privacy_defaults(mut config: GuardConfig) -> GuardConfig {
    let privacy = config.privacy.get_or_insert_with(PrivacyConfig::default);
    privacy.enable_anonymization.get_or_insert(false);
    privacy.enable_deanonymization.get_or_insert(true);
    config
}

/// Audit events are off unless enabled; the directory defaults under the config dir.
fn apply_audit_defaults(mut config: GuardConfig) -> GuardConfig {
    let audit = config.audit.get_or_insert_with(AuditConfig::default);
    audit.log_access_events.get_or_insert(false);
    audit.log_execution_events.get_or_insert(false);
    if audit.log_dir.as_deref().map(str::trim).unwrap_or("").is_empty() {
        audit.log_dir = Some(config_dir().join("audit").to_string_lossy().into_owned());
    }
    config
}

fn apply_logging_defaults(mut config: GuardConfig) -> GuardConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.redact_pii.get_or_insert(true);
    if logging.dir.is_none() {
        logging.dir = Some(config_dir().join("logs").to_string_lossy().into_owned());
    }
    config
}

/// Sandbox defaults are maximally restrictive. Zero limits are treated as
/// malformed and replaced.
fn apply_sandbox_defaults(mut config: GuardConfig) -> GuardConfig {
    let sandbox = config.sandbox.get_or_insert_with(SandboxConfig::default);
    sandbox.enabled.get_or_insert(true);
    sandbox.block_outbound_network.get_or_insert(true);
    sandbox.mode.get_or_insert_with(|| "local".to_string());
    sandbox.allowed_hosts.get_or_insert_with(Vec::new);
    sandbox.runtime.get_or_insert_with(|| DEFAULT_RUNTIME.to_string());
    sandbox
        .container_image
        .get_or_insert_with(|| DEFAULT_CONTAINER_IMAGE.to_string());

    fill_limit(&mut sandbox.cpu_limit_secs, DEFAULT_CPU_LIMIT_SECS, "sandbox.cpuLimitSecs");
    fill_limit(&mut sandbox.memory_limit_mb, DEFAULT_MEMORY_LIMIT_MB, "sandbox.memoryLimitMb");
    fill_limit(&mut sandbox.timeout_secs, DEFAULT_TIMEOUT_SECS, "sandbox.timeoutSecs");
    config
}

fn fill_limit(slot: &mut Option<u64>, default: u64, path: &str) {
    match slot {
        Some(0) => {
            warn!(path, default, "Zero sandbox limit is not allowed; using default");
            *slot = Some(default);
        }
        Some(_) => {}
        None => *slot = Some(default),
    }
}
