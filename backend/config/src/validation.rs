//! Config validation: required credentials and sandbox sanity checks.

use thiserror::Error;

use crate::schema::GuardConfig;

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &GuardConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_api(config, &mut report);
    validate_audit(config, &mut report);
    validate_sandbox(config, &mut report);
    report
}

/// API credentials are the only fields that fail fast.
fn validate_api(config: &GuardConfig, report: &mut ValidationReport) {
    let api = config.api();
    if api.token.as_deref().map(str::trim).unwrap_or("").is_empty() {
        report.error("api.token", "API token is required (set CANVAS_API_TOKEN)");
    }
    match api.base_url.as_deref().map(str::trim) {
        None | Some("") => {
            report.error("api.baseUrl", "API base URL is required (set CANVAS_API_URL)")
        }
        Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => {
            report.error("api.baseUrl", format!("'{url}' is not an http(s) URL"))
        }
        Some(url) if url.starts_with("http://") => {
            report.warn("api.baseUrl", "API base URL is not using TLS")
        }
        Some(_) => {}
    }
}

fn validate_audit(config: &GuardConfig, report: &mut ValidationReport) {
    let audit = config.audit();
    let any_enabled = audit.access_events_enabled() || audit.execution_events_enabled();
    if any_enabled && audit.log_dir.as_deref().map(str::trim).unwrap_or("").is_empty() {
        report.warn(
            "audit.logDir",
            "Audit events are enabled but no directory is set; events go to stderr only",
        );
    }
}

/// Relaxations of the sandbox are legal but always reported.
fn validate_sandbox(config: &GuardConfig, report: &mut ValidationReport) {
    let sandbox = config.sandbox();
    if !sandbox.enabled() {
        report.warn("sandbox.enabled", "Guest code sandboxing is disabled");
    }
    if !sandbox.blocks_outbound_network() {
        report.warn(
            "sandbox.blockOutboundNetwork",
            "Guest code may reach any host; the network guard is not installed",
        );
    }
    let mode = sandbox.mode_or_default();
    if !matches!(mode.as_str(), "local" | "container") {
        report.warn(
            "sandbox.mode",
            format!("Unknown sandbox mode '{mode}'; falling back to 'local'"),
        );
    }
    for (i, host) in sandbox.allowed_hosts.iter().flatten().enumerate() {
        if host.contains('/') || host.contains(':') || host.trim().is_empty() {
            report.warn(
                format!("sandbox.allowedHosts[{i}]"),
                format!("'{host}' is not a bare hostname and is ignored"),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ApiConfig, SandboxConfig};

    fn with_api() -> GuardConfig {
        GuardConfig {
            api: Some(ApiConfig {
                base_url: Some("https://canvas.example.com/api/v1".to_string()),
                token: Some("1234~secret".to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn missing_credentials_are_errors() {
        let report = validate(&GuardConfig::default());
        assert!(!report.is_valid());
        let paths: Vec<_> = report.errors.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"api.token"));
        assert!(paths.contains(&"api.baseUrl"));
    }

    #[test]
    fn complete_config_is_valid() {
        let report = validate(&with_api());
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn relaxed_sandbox_warns() {
        let mut cfg = with_api();
        cfg.sandbox = Some(SandboxConfig {
            block_outbound_network: Some(false),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(report.is_valid());
        assert_eq!(report.warnings[0].path, "sandbox.blockOutboundNetwork");
    }

    #[test]
    fn malformed_sandbox_values_only_warn() {
        let mut cfg = with_api();
        cfg.sandbox = Some(SandboxConfig {
            mode: Some("vm".to_string()),
            allowed_hosts: Some(vec!["https://evil.example.com".to_string()]),
            ..Default::default()
        });
        let report = validate(&cfg);
        assert!(report.is_valid(), "errors: {:?}", report.errors);
        let paths: Vec<_> = report.warnings.iter().map(|w| w.path.as_str()).collect();
        assert!(paths.contains(&"sandbox.mode"));
        assert!(paths.contains(&"sandbox.allowedHosts[0]"));
    }
}
