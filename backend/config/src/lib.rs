//! `lmsguard-config`: runtime configuration for the trust boundary.
//!
//! Provides:
//! - Typed config schema (API credentials, privacy, audit, logging, sandbox)
//! - YAML loading with `${ENV_VAR}` substitution
//! - Environment-variable overrides with lenient scalar parsing
//! - Default value application (sandbox defaults are maximally restrictive)
//! - Validation; missing API credentials fail fast
//! - Config redaction for safe logging/display

pub mod defaults;
pub mod env;
pub mod io;
pub mod lenient;
pub mod overrides;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config};
pub use overrides::{apply_env_overrides, apply_process_env_overrides};
pub use redact::{redact, redact_config};
pub use schema::{
    ApiConfig, AuditConfig, GuardConfig, LoggingConfig, PrivacyConfig, SandboxConfig,
};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};
use lmsguard_core::GuardError;
use std::path::Path;

/// Load, substitute env vars, apply env overrides and defaults, then validate.
///
/// This is the main entry point for loading a config at startup. Validation
/// errors (missing API credentials) abort; warnings are logged.
pub async fn load_and_prepare(path: &Path) -> Result<GuardConfig> {
    let raw_config = load_config(path).await?;

    let value = serde_json::to_value(&raw_config)
        .context("Failed to serialize config for processing")?;
    let value = resolve_env_vars(&value).context("Failed to resolve env vars in config")?;
    let config: GuardConfig = serde_json::from_value(value)
        .context("Failed to deserialize config after processing")?;

    let config = apply_all_defaults(apply_process_env_overrides(config));
    ensure_valid(config)
}

/// Validate a prepared config, logging warnings and failing on errors.
pub fn ensure_valid(config: GuardConfig) -> Result<GuardConfig> {
    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        // Only absent credentials are reported as "required".
        let err = if first.message.contains("required") {
            GuardError::MissingCredential(first.to_string())
        } else {
            GuardError::Config(first.to_string())
        };
        return Err(err.into());
    }
    Ok(config)
}
