//! lmsguard runtime configuration schema.
//!
//! Every field is optional so that partial YAML files deserialize cleanly;
//! `apply_all_defaults` fills the gaps and the accessor methods resolve the
//! documented defaults for anything still unset.

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_CONTAINER_IMAGE, DEFAULT_CPU_LIMIT_SECS, DEFAULT_LOG_LEVEL, DEFAULT_MEMORY_LIMIT_MB,
    DEFAULT_RUNTIME, DEFAULT_TIMEOUT_SECS,
};
use crate::lenient;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the trust boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    /// External LMS API credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiConfig>,

    /// Student data anonymization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacyConfig>,

    /// FERPA audit trail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditConfig>,

    /// Diagnostic logging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Guest code sandbox
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,
}

impl GuardConfig {
    pub fn api(&self) -> ApiConfig {
        self.api.clone().unwrap_or_default()
    }

    pub fn privacy(&self) -> PrivacyConfig {
        self.privacy.clone().unwrap_or_default()
    }

    pub fn audit(&self) -> AuditConfig {
        self.audit.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    pub fn sandbox(&self) -> SandboxConfig {
        self.sandbox.clone().unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Base URL of the LMS API, e.g. `https://canvas.example.com/api/v1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Bearer token used for API calls (also handed to guest code)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl ApiConfig {
    /// Host part of the base URL, lowercased, without port.
    pub fn host(&self) -> Option<String> {
        let url = self.base_url.as_deref()?;
        let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
        let authority = rest.split(|c: char| c == '/' || c == '?' || c == '#').next()?;
        let host = authority.rsplit('@').next()?.split(':').next()?;
        if host.is_empty() {
            None
        } else {
            Some(host.to_ascii_lowercase())
        }
    }
}

// ---------------------------------------------------------------------------
// Privacy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyConfig {
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub enable_anonymization: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub enable_deanonymization: Option<bool>,
    /// Secret used to derive anonymous tokens. When unset a random key is
    /// drawn per process and tokens are stable for that process only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymization_key: Option<String>,
}

impl PrivacyConfig {
    pub fn anonymization_enabled(&self) -> bool {
        self.enable_anonymization.unwrap_or(false)
    }

    pub fn deanonymization_enabled(&self) -> bool {
        self.enable_deanonymization.unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditConfig {
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub log_access_events: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub log_execution_events: Option<bool>,
    /// Directory holding `audit.jsonl` and its rotated siblings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,
}

impl AuditConfig {
    pub fn access_events_enabled(&self) -> bool {
        self.log_access_events.unwrap_or(false)
    }

    pub fn execution_events_enabled(&self) -> bool {
        self.log_execution_events.unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Redact PII from diagnostic log context fields
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub redact_pii: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl LoggingConfig {
    pub fn level_or_default(&self) -> String {
        self.level.clone().unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn redaction_enabled(&self) -> bool {
        self.redact_pii.unwrap_or(true)
    }
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>, // "local" | "container"
    #[serde(default, deserialize_with = "lenient::opt_bool", skip_serializing_if = "Option::is_none")]
    pub block_outbound_network: Option<bool>,
    #[serde(default, deserialize_with = "lenient::opt_u64", skip_serializing_if = "Option::is_none")]
    pub cpu_limit_secs: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64", skip_serializing_if = "Option::is_none")]
    pub memory_limit_mb: Option<u64>,
    #[serde(default, deserialize_with = "lenient::opt_u64", skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    /// Guest runtime executable (local mode) or command (container mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
}

impl SandboxConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn mode_or_default(&self) -> String {
        self.mode.clone().unwrap_or_else(|| "local".to_string())
    }

    pub fn blocks_outbound_network(&self) -> bool {
        self.block_outbound_network.unwrap_or(true)
    }

    pub fn cpu_limit_secs_or_default(&self) -> u64 {
        self.cpu_limit_secs.unwrap_or(DEFAULT_CPU_LIMIT_SECS)
    }

    pub fn memory_limit_mb_or_default(&self) -> u64 {
        self.memory_limit_mb.unwrap_or(DEFAULT_MEMORY_LIMIT_MB)
    }

    pub fn timeout_secs_or_default(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    pub fn runtime_or_default(&self) -> String {
        self.runtime.clone().unwrap_or_else(|| DEFAULT_RUNTIME.to_string())
    }

    pub fn container_image_or_default(&self) -> String {
        self.container_image
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTAINER_IMAGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_sandbox_is_restrictive() {
        let sandbox = SandboxConfig::default();
        assert!(sandbox.enabled());
        assert!(sandbox.blocks_outbound_network());
        assert_eq!(sandbox.cpu_limit_secs_or_default(), 30);
        assert_eq!(sandbox.memory_limit_mb_or_default(), 512);
        assert_eq!(sandbox.timeout_secs_or_default(), 120);
    }

    #[test]
    fn redaction_on_by_default() {
        assert!(LoggingConfig::default().redaction_enabled());
        assert!(!AuditConfig::default().access_events_enabled());
        assert!(!PrivacyConfig::default().anonymization_enabled());
    }

    #[test]
    fn api_host_extraction() {
        let api = ApiConfig {
            base_url: Some("https://Canvas.Example.com:443/api/v1".to_string()),
            token: None,
        };
        assert_eq!(api.host().as_deref(), Some("canvas.example.com"));
    }

    #[test]
    fn malformed_values_fall_back() {
        let yaml = "sandbox:\n  enabled: maybe\n  cpuLimitSecs: lots\n  timeoutSecs: \"60\"\n";
        let cfg: GuardConfig = serde_yaml::from_str(yaml).unwrap();
        let sandbox = cfg.sandbox();
        assert!(sandbox.enabled());
        assert_eq!(sandbox.cpu_limit_secs_or_default(), 30);
        assert_eq!(sandbox.timeout_secs_or_default(), 60);
    }
}
