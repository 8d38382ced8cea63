//! Guest code sandbox: execution policy, allowlisted environment, network
//! guard generation and the supervised runner.

pub mod container;
pub mod env;
pub mod network_guard;
pub mod policy;
pub mod runner;

pub use container::{container_plan, docker_available, CONTAINER_WORKDIR};
pub use env::{build_safe_env, is_secret_name, API_TOKEN_VAR, API_URL_VAR, SAFE_ENV_VARS};
pub use network_guard::{
    render_network_guard, write_network_guard, HostAllowlist, BLOCKED_MODULES, GUARD_FILE_NAME,
};
pub use policy::{SandboxMode, SandboxPolicy};
pub use runner::{
    is_node_runtime, sha256_hex, ExecutionOutcome, ExecutionStatus, LaunchPlan, ResourceLimits,
    SandboxRunner, GUEST_FILE_NAME, MAX_OUTPUT_BYTES,
};

/// True when `runtime` can be started (`<runtime> --version` succeeds).
pub async fn runtime_available(runtime: &str) -> bool {
    tokio::process::Command::new(runtime)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}
