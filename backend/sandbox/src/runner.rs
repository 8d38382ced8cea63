//! Guest code runner.
//!
//! Each call gets a fresh scratch directory holding the guest program and,
//! when outbound traffic is restricted, the network guard. The runtime is
//! launched with the allowlisted environment only, awaited under the
//! wall-clock timeout and force-killed (whole process group) on expiry or
//! when the calling future is dropped. The outcome is audited by digest.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lmsguard_config::{ApiConfig, GuardConfig};
use lmsguard_core::GuardError;
use lmsguard_logging::{AuditLogger, CodeDigest};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::container::container_plan;
use crate::env::build_safe_env;
use crate::network_guard::{write_network_guard, GUARD_FILE_NAME};
use crate::policy::{SandboxMode, SandboxPolicy};

/// File name of the guest program inside the scratch directory.
pub const GUEST_FILE_NAME: &str = "main.mjs";

/// Per-stream cap on captured output.
pub const MAX_OUTPUT_BYTES: usize = 200_000;

/// How long to wait for output pipes to drain after the process is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Plans and outcomes
// ---------------------------------------------------------------------------

/// OS ceilings applied to a local guest between fork and exec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_secs: u64,
    pub memory_bytes: u64,
}

/// Fully resolved process launch.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    /// Complete environment; nothing is inherited.
    pub env: BTreeMap<String, String>,
    pub cwd: PathBuf,
    pub limits: Option<ResourceLimits>,
    /// Arguments for `program` that tear down leftovers after a forced kill.
    pub cleanup: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub sandbox_mode: SandboxMode,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
    pub duration_sec: f64,
    /// SHA-256 of the guest source
    pub code_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Hex SHA-256 of guest source.
pub fn sha256_hex(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

/// True when `runtime` names a Node executable (`node`, `/usr/bin/node22`, …).
pub fn is_node_runtime(runtime: &str) -> bool {
    Path::new(runtime)
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with("node"))
}

struct RawOutput {
    exit_code: Option<i32>,
    signal: Option<i32>,
    timed_out: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

pub struct SandboxRunner {
    policy: SandboxPolicy,
    api: ApiConfig,
    audit: Arc<AuditLogger>,
    host_env: Option<HashMap<String, String>>,
}

impl SandboxRunner {
    pub fn new(policy: SandboxPolicy, api: ApiConfig, audit: Arc<AuditLogger>) -> Self {
        Self {
            policy,
            api,
            audit,
            host_env: None,
        }
    }

    pub fn from_config(config: &GuardConfig, audit: Arc<AuditLogger>) -> Self {
        let api = config.api();
        Self::new(SandboxPolicy::from_config(&config.sandbox(), &api), api, audit)
    }

    /// Use a fixed host environment instead of the process environment.
    pub fn with_host_env(mut self, host_env: HashMap<String, String>) -> Self {
        self.host_env = Some(host_env);
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Run guest code to completion. Never fails: setup problems come back
    /// as an `Error` outcome.
    pub async fn execute(&self, code: &str) -> ExecutionOutcome {
        let started = Instant::now();
        let code_hash = sha256_hex(code);
        let mode = self.policy.effective_mode();
        info!(mode = %mode, code_hash = %&code_hash[..12], "[Sandbox] Executing guest code");

        let result = match self.prepare(code) {
            Ok((scratch, plan)) => {
                let result = run_plan(&plan, self.policy.timeout()).await;
                drop(scratch);
                result
            }
            Err(e) => Err(e),
        };

        let duration_sec = started.elapsed().as_secs_f64();
        let outcome = match result {
            Ok(raw) => self.outcome_from(raw, mode, code_hash, duration_sec),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "[Sandbox] Guest launch failed");
                ExecutionOutcome {
                    status: ExecutionStatus::Error,
                    sandbox_mode: mode,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    truncated: false,
                    duration_sec,
                    code_hash,
                    error: Some(format!("{e:#}")),
                }
            }
        };

        info!(
            status = outcome.status.as_str(),
            exit_code = ?outcome.exit_code,
            duration_sec = outcome.duration_sec,
            "[Sandbox] Guest finished"
        );
        self.audit_outcome(&outcome);
        outcome
    }

    fn prepare(&self, code: &str) -> Result<(TempDir, LaunchPlan)> {
        let mode = self.policy.effective_mode();
        let node = is_node_runtime(self.policy.runtime());
        let isolated_network =
            mode == SandboxMode::Container && self.policy.allowed_hosts().is_empty();
        let with_guard = self.policy.blocks_outbound_network() && !isolated_network;
        if with_guard && !node {
            return Err(GuardError::SandboxSetup(format!(
                "Outbound network blocking needs a Node runtime to load the network guard; '{}' is not one",
                self.policy.runtime()
            ))
            .into());
        }

        let scratch = tempfile::Builder::new()
            .prefix("lmsguard-")
            .tempdir()
            .context("Failed to create sandbox scratch directory")?;
        let guest = scratch.path().join(GUEST_FILE_NAME);
        std::fs::write(&guest, code)
            .with_context(|| format!("Failed to write guest program to {}", guest.display()))?;
        if with_guard {
            write_network_guard(self.policy.allowed_hosts(), scratch.path())?;
        }

        let host_env = self
            .host_env
            .clone()
            .unwrap_or_else(|| std::env::vars().collect());
        let guest_env = build_safe_env(&host_env, &self.api);

        let plan = match mode {
            SandboxMode::Container => {
                container_plan(&self.policy, scratch.path(), &guest_env, &host_env, with_guard)
            }
            SandboxMode::Local => {
                let limits = ResourceLimits {
                    cpu_secs: self.policy.cpu_limit_secs(),
                    memory_bytes: self.policy.memory_limit_mb().saturating_mul(1024 * 1024),
                };
                local_plan(&self.policy, scratch.path(), guest_env, with_guard, Some(limits))
            }
            SandboxMode::Unrestricted => {
                local_plan(&self.policy, scratch.path(), guest_env, with_guard, None)
            }
        };
        debug!(program = %plan.program, args = ?plan.args, "[Sandbox] Launch plan ready");
        Ok((scratch, plan))
    }

    fn outcome_from(
        &self,
        raw: RawOutput,
        mode: SandboxMode,
        code_hash: String,
        duration_sec: f64,
    ) -> ExecutionOutcome {
        let (status, error) = if raw.timed_out {
            (
                ExecutionStatus::Timeout,
                Some(format!("Execution timed out after {}s", self.policy.timeout_secs())),
            )
        } else if raw.exit_code == Some(0) {
            (ExecutionStatus::Success, None)
        } else if let Some(signal) = raw.signal {
            (ExecutionStatus::Error, Some(describe_signal(signal)))
        } else {
            (ExecutionStatus::Error, None)
        };

        ExecutionOutcome {
            status,
            sandbox_mode: mode,
            exit_code: raw.exit_code,
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
            truncated: raw.truncated,
            duration_sec,
            code_hash,
            error,
        }
    }

    fn audit_outcome(&self, outcome: &ExecutionOutcome) {
        match CodeDigest::from_hex(&outcome.code_hash) {
            Some(digest) => self.audit.log_code_execution(
                &digest,
                outcome.sandbox_mode.as_str(),
                outcome.status.as_str(),
                outcome.duration_sec,
            ),
            None => warn!("[Sandbox] Code digest rejected; execution not audited"),
        }
    }
}

fn local_plan(
    policy: &SandboxPolicy,
    workdir: &Path,
    env: BTreeMap<String, String>,
    with_guard: bool,
    limits: Option<ResourceLimits>,
) -> LaunchPlan {
    let mut args = Vec::new();
    if is_node_runtime(policy.runtime()) {
        if limits.is_some() {
            args.push(format!("--max-old-space-size={}", policy.memory_limit_mb()));
        }
        if with_guard {
            args.push("--require".to_string());
            args.push(workdir.join(GUARD_FILE_NAME).display().to_string());
        }
    }
    args.push(GUEST_FILE_NAME.to_string());

    LaunchPlan {
        program: policy.runtime().to_string(),
        args,
        env,
        cwd: workdir.to_path_buf(),
        limits,
        cleanup: None,
    }
}

fn describe_signal(signal: i32) -> String {
    #[cfg(unix)]
    {
        if signal == libc::SIGXCPU {
            return format!("Terminated by signal {signal} (CPU limit exceeded)");
        }
        if signal == libc::SIGKILL {
            return format!("Terminated by signal {signal} (killed)");
        }
    }
    format!("Terminated by signal {signal}")
}

// ---------------------------------------------------------------------------
// Process supervision
// ---------------------------------------------------------------------------

async fn run_plan(plan: &LaunchPlan, timeout: Duration) -> Result<RawOutput> {
    let mut cmd = Command::new(&plan.program);
    cmd.args(&plan.args)
        .current_dir(&plan.cwd)
        .env_clear()
        .envs(&plan.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        cmd.process_group(0);
        if let Some(limits) = plan.limits {
            // SAFETY: the hook only calls setrlimit, which is async-signal-safe.
            unsafe {
                cmd.pre_exec(move || apply_limits(limits));
            }
        }
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("Failed to start guest runtime '{}'", plan.program))?;
    let mut reaper = Reaper {
        pgid: child.id(),
        program: plan.program.clone(),
        cleanup: plan.cleanup.clone(),
        armed: true,
    };

    let stdout = child.stdout.take().context("Guest stdout was not captured")?;
    let stderr = child.stderr.take().context("Guest stderr was not captured")?;
    let stdout_task = tokio::spawn(read_capped(stdout, MAX_OUTPUT_BYTES));
    let stderr_task = tokio::spawn(read_capped(stderr, MAX_OUTPUT_BYTES));

    let exited = tokio::select! {
        exited = leader_exited(&mut child) => {
            exited?;
            true
        }
        _ = tokio::time::sleep(timeout) => false,
    };

    let timed_out = !exited;
    if timed_out {
        warn!(timeout_secs = timeout.as_secs(), "[Sandbox] Guest timed out; killing process group");
        reaper.kill_group();
        if let Err(e) = child.kill().await {
            debug!(error = %e, "[Sandbox] Guest already gone");
        }
        reaper.run_cleanup().await;
    } else {
        // The leader is not reaped yet, so its pid still pins the group id.
        // Strays left in the group would otherwise keep the pipes open.
        reaper.kill_group();
    }
    let status = child.wait().await.context("Failed to wait for guest process")?;
    reaper.armed = false;

    let (stdout, stdout_truncated) = drain(stdout_task).await;
    let (stderr, stderr_truncated) = drain(stderr_task).await;

    Ok(RawOutput {
        exit_code: if timed_out { None } else { status.code() },
        signal: if timed_out { None } else { exit_signal(status) },
        timed_out,
        stdout,
        stderr,
        truncated: stdout_truncated || stderr_truncated,
    })
}

/// Resolve once the guest leader has exited, leaving it unreaped.
#[cfg(unix)]
async fn leader_exited(child: &mut Child) -> Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };
    tokio::task::spawn_blocking(move || loop {
        // SAFETY: siginfo_t is plain data; waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    })
    .await
    .context("Guest wait task failed")?
    .context("Failed to wait for guest process")
}

#[cfg(not(unix))]
async fn leader_exited(child: &mut Child) -> Result<()> {
    child
        .wait()
        .await
        .map(|_| ())
        .context("Failed to wait for guest process")
}

#[cfg(unix)]
fn exit_signal(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: std::process::ExitStatus) -> Option<i32> {
    None
}

/// Read a stream to EOF, keeping at most `cap` bytes.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                if n > room {
                    truncated = true;
                }
                kept.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
    (kept, truncated)
}

async fn drain(mut task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            debug!(error = %e, "[Sandbox] Output reader failed");
            (Vec::new(), false)
        }
        Err(_) => {
            task.abort();
            (Vec::new(), true)
        }
    }
}

/// Kills the guest's process group if the run is abandoned midway
/// (timeout or a dropped future).
struct Reaper {
    pgid: Option<u32>,
    program: String,
    cleanup: Option<Vec<String>>,
    armed: bool,
}

impl Reaper {
    fn kill_group(&self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }

    async fn run_cleanup(&self) {
        let Some(args) = &self.cleanup else { return };
        let result = Command::new(&self.program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            warn!(error = %e, "[Sandbox] Cleanup command failed");
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("[Sandbox] Guest run cancelled; killing process group");
        self.kill_group();
        if let Some(args) = &self.cleanup {
            let _ = std::process::Command::new(&self.program)
                .args(args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    if pgid == 0 {
        return;
    }
    // SAFETY: killpg has no memory-safety preconditions; ESRCH is expected
    // once the group is empty.
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[cfg(unix)]
fn apply_limits(limits: ResourceLimits) -> std::io::Result<()> {
    macro_rules! lower_rlimit {
        ($resource:expr, $value:expr) => {{
            let value = $value as libc::rlim_t;
            let limit = libc::rlimit {
                rlim_cur: value,
                rlim_max: value,
            };
            if unsafe { libc::setrlimit($resource, &limit) } != 0 {
                let err = std::io::Error::last_os_error();
                // EPERM: the inherited hard limit is already lower.
                if err.raw_os_error() != Some(libc::EPERM) {
                    return Err(err);
                }
            }
        }};
    }

    lower_rlimit!(libc::RLIMIT_CPU, limits.cpu_secs);
    lower_rlimit!(libc::RLIMIT_DATA, limits.memory_bytes);
    Ok(())
}
