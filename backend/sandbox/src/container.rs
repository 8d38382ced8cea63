//! Container launch plans: one throwaway `docker run --rm` per execution.
//!
//! The scratch directory is mounted read-only; guest variables are passed by
//! name (`-e NAME`) so their values never appear on the docker command line.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::debug;

use crate::network_guard::GUARD_FILE_NAME;
use crate::policy::SandboxPolicy;
use crate::runner::{is_node_runtime, LaunchPlan, GUEST_FILE_NAME};

/// Mount point of the scratch directory inside the container.
pub const CONTAINER_WORKDIR: &str = "/sandbox";

/// Host variables the docker client itself may need.
const DOCKER_CLIENT_VARS: &[&str] = &[
    "DOCKER_HOST",
    "DOCKER_CONTEXT",
    "DOCKER_CONFIG",
    "DOCKER_CERT_PATH",
    "DOCKER_TLS_VERIFY",
];

/// Guest variables that describe the host and make no sense in the container.
const HOST_ONLY_VARS: &[&str] = &[
    "PATH", "HOME", "USER", "LOGNAME", "TMPDIR", "TEMP", "TMP", "NODE_PATH", "SYSTEMROOT",
];

const PIDS_LIMIT: u32 = 64;

fn container_name() -> String {
    format!("lmsguard-sandbox-{}", uuid::Uuid::new_v4().simple())
}

/// Build the `docker run` plan for one execution.
///
/// `guest_env` is the allowlisted guest environment; `host_env` only feeds the
/// docker client's own connection settings.
pub fn container_plan(
    policy: &SandboxPolicy,
    workdir: &Path,
    guest_env: &BTreeMap<String, String>,
    host_env: &HashMap<String, String>,
    with_guard: bool,
) -> LaunchPlan {
    let name = container_name();
    let memory = format!("{}m", policy.memory_limit_mb());
    let network = if policy.blocks_outbound_network() && policy.allowed_hosts().is_empty() {
        "none"
    } else {
        "bridge"
    };

    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--name".into(),
        name.clone(),
        "--network".into(),
        network.into(),
        "--memory".into(),
        memory.clone(),
        "--memory-swap".into(),
        memory,
        "--cpus".into(),
        "1".into(),
        format!("--ulimit=cpu={0}:{0}", policy.cpu_limit_secs()),
        format!("--pids-limit={PIDS_LIMIT}"),
        "--read-only".into(),
        "--tmpfs".into(),
        "/tmp".into(),
        "--cap-drop".into(),
        "ALL".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "-v".into(),
        format!("{}:{CONTAINER_WORKDIR}:ro", workdir.display()),
        "-w".into(),
        CONTAINER_WORKDIR.into(),
    ];

    for key in guest_env.keys().filter(|k| !HOST_ONLY_VARS.contains(&k.as_str())) {
        args.push("-e".into());
        args.push(key.clone());
    }

    args.push(policy.container_image().to_string());
    args.push(policy.runtime().to_string());
    if is_node_runtime(policy.runtime()) {
        args.push(format!("--max-old-space-size={}", policy.memory_limit_mb()));
        if with_guard {
            args.push("--require".into());
            args.push(format!("{CONTAINER_WORKDIR}/{GUARD_FILE_NAME}"));
        }
    }
    args.push(GUEST_FILE_NAME.into());

    // The docker client resolves `-e NAME` from its own environment.
    let mut env = guest_env.clone();
    for var in DOCKER_CLIENT_VARS {
        if let Some(value) = host_env.get(*var) {
            env.insert(var.to_string(), value.clone());
        }
    }

    debug!(container = %name, network, image = %policy.container_image(), "[Sandbox] Container plan built");
    LaunchPlan {
        program: "docker".to_string(),
        args,
        env,
        cwd: workdir.to_path_buf(),
        limits: None,
        cleanup: Some(vec!["rm".to_string(), "-f".to_string(), name]),
    }
}

/// True when a docker daemon answers.
pub async fn docker_available() -> bool {
    tokio::process::Command::new("docker")
        .args(["version", "--format", "{{.Server.Version}}"])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok_and(|s| s.success())
}
