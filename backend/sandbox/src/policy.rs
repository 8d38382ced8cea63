//! Sandbox policy: the immutable limits applied to one guest execution.

use lmsguard_config::defaults::{
    DEFAULT_CONTAINER_IMAGE, DEFAULT_CPU_LIMIT_SECS, DEFAULT_MEMORY_LIMIT_MB, DEFAULT_RUNTIME,
    DEFAULT_TIMEOUT_SECS,
};
use lmsguard_config::{ApiConfig, SandboxConfig};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// How the guest process is isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Host process with its own process group and OS resource limits.
    Local,
    /// Throwaway container.
    Container,
    /// Sandboxing disabled by configuration: allowlisted env and timeout only.
    Unrestricted,
}

impl SandboxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Container => "container",
            Self::Unrestricted => "unrestricted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "container" => Some(Self::Container),
            _ => None,
        }
    }
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for one execution. Built fresh per call; no setters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxPolicy {
    enabled: bool,
    mode: SandboxMode,
    block_outbound_network: bool,
    cpu_limit_secs: u64,
    memory_limit_mb: u64,
    timeout_secs: u64,
    allowed_hosts: Vec<String>,
    runtime: String,
    container_image: String,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SandboxMode::Local,
            block_outbound_network: true,
            cpu_limit_secs: DEFAULT_CPU_LIMIT_SECS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            allowed_hosts: Vec::new(),
            runtime: DEFAULT_RUNTIME.to_string(),
            container_image: DEFAULT_CONTAINER_IMAGE.to_string(),
        }
    }
}

impl SandboxPolicy {
    /// Resolve the policy from configuration. The API host is always allowed
    /// so guest code can reach the LMS with the injected credentials.
    pub fn from_config(sandbox: &SandboxConfig, api: &ApiConfig) -> Self {
        let mode = match SandboxMode::parse(&sandbox.mode_or_default()) {
            Some(mode) => mode,
            None => {
                warn!(mode = %sandbox.mode_or_default(), "[Sandbox] Unknown mode; using local");
                SandboxMode::Local
            }
        };

        let mut allowed_hosts: Vec<String> = Vec::new();
        let configured = sandbox.allowed_hosts.iter().flatten().cloned();
        for host in configured.chain(api.host()) {
            let host = host.trim().to_ascii_lowercase();
            if host.contains('/') || host.contains(':') {
                warn!(host = %host, "[Sandbox] Ignoring allowlist entry that is not a bare hostname");
                continue;
            }
            if !host.is_empty() && !allowed_hosts.contains(&host) {
                allowed_hosts.push(host);
            }
        }

        Self {
            enabled: sandbox.enabled(),
            mode,
            block_outbound_network: sandbox.blocks_outbound_network(),
            cpu_limit_secs: positive_or(sandbox.cpu_limit_secs_or_default(), DEFAULT_CPU_LIMIT_SECS),
            memory_limit_mb: positive_or(sandbox.memory_limit_mb_or_default(), DEFAULT_MEMORY_LIMIT_MB),
            timeout_secs: positive_or(sandbox.timeout_secs_or_default(), DEFAULT_TIMEOUT_SECS),
            allowed_hosts,
            runtime: sandbox.runtime_or_default(),
            container_image: sandbox.container_image_or_default(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Mode actually used: `Unrestricted` whenever sandboxing is disabled.
    pub fn effective_mode(&self) -> SandboxMode {
        if self.enabled {
            self.mode
        } else {
            SandboxMode::Unrestricted
        }
    }

    pub fn blocks_outbound_network(&self) -> bool {
        self.block_outbound_network
    }

    pub fn cpu_limit_secs(&self) -> u64 {
        self.cpu_limit_secs
    }

    pub fn memory_limit_mb(&self) -> u64 {
        self.memory_limit_mb
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed_hosts
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    pub fn container_image(&self) -> &str {
        &self.container_image
    }
}

fn positive_or(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}
