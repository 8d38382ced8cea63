//! FERPA audit trail.
//!
//! Data-access and code-execution events are written as JSON Lines to
//! `audit.jsonl` (size-rotated) and mirrored one line per event on stderr.
//! Every write failure is swallowed and reported on the diagnostic channel:
//! compliance logging must never take down the operation it records.
//!
//! Code-execution events carry a [`CodeDigest`], never source text. The
//! logger has no way to hash anything itself.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use lmsguard_config::AuditConfig;
use serde::Serialize;
use tracing::{debug, warn};

use crate::redact::sanitize_url;
use crate::rotating::RotatingFileWriter;

/// Name of the active audit file inside the configured directory.
pub const AUDIT_FILE_NAME: &str = "audit.jsonl";

/// Rotation threshold of the audit file.
pub const AUDIT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Number of rotated audit files kept.
pub const AUDIT_BACKUP_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    DataAccess {
        timestamp: String,
        method: String,
        endpoint: String,
        status: String,
    },
    CodeExecution {
        timestamp: String,
        code_hash: String,
        sandbox_mode: String,
        status: String,
        duration_sec: f64,
    },
}

/// Hex digest of guest source code, as produced by the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDigest(String);

impl CodeDigest {
    /// Accept a precomputed hex digest (8 to 128 hex characters).
    ///
    /// Anything else is rejected so that source text cannot be smuggled
    /// into the audit trail through this field.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let valid = (8..=128).contains(&hex.len()) && hex.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Mask numeric identifiers in an API path: `/courses/1/users/2` → `/courses/***/users/***`.
/// A query string or fragment never shields the last path segment.
pub fn sanitize_endpoint(endpoint: &str) -> String {
    sanitize_url(endpoint)
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

struct AuditSinks {
    file: Option<RotatingFileWriter>,
    mirror: Box<dyn Write + Send>,
    access_enabled: bool,
    execution_enabled: bool,
}

/// Process-wide audit logger; owned by the trust context and shared by reference.
#[derive(Default)]
pub struct AuditLogger {
    state: Mutex<Option<AuditSinks>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize from config with stderr as the mirror. Idempotent: returns
    /// `false` and changes nothing if already initialized.
    pub fn init(&self, config: &AuditConfig) -> bool {
        self.init_with_mirror(config, Box::new(io::stderr()))
    }

    /// Initialize with a custom mirror stream (tests capture it in memory).
    pub fn init_with_mirror(&self, config: &AuditConfig, mirror: Box<dyn Write + Send>) -> bool {
        let mut state = self.lock();
        if state.is_some() {
            debug!("[Audit] Already initialized; ignoring");
            return false;
        }

        let access_enabled = config.access_events_enabled();
        let execution_enabled = config.execution_events_enabled();
        let file = if access_enabled || execution_enabled {
            open_audit_file(config.log_dir.as_deref())
        } else {
            None
        };

        debug!(access_enabled, execution_enabled, "[Audit] Initialized");
        *state = Some(AuditSinks {
            file,
            mirror,
            access_enabled,
            execution_enabled,
        });
        true
    }

    /// Tear down all sinks so that `init` may run again.
    pub fn reset(&self) {
        *self.lock() = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().is_some()
    }

    pub fn access_events_enabled(&self) -> bool {
        self.lock().as_ref().is_some_and(|s| s.access_enabled)
    }

    pub fn execution_events_enabled(&self) -> bool {
        self.lock().as_ref().is_some_and(|s| s.execution_enabled)
    }

    /// Rotation settings of the active file sink: `(max_bytes, backup_count)`.
    pub fn rotation(&self) -> Option<(u64, usize)> {
        self.lock()
            .as_ref()
            .and_then(|s| s.file.as_ref())
            .map(|f| (f.max_bytes(), f.backup_count()))
    }

    /// Path of the active audit file, if one is open.
    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock()
            .as_ref()
            .and_then(|s| s.file.as_ref())
            .map(|f| f.path().to_path_buf())
    }

    /// Record an API data access. The endpoint is sanitized before writing.
    pub fn log_data_access(&self, method: &str, endpoint: &str, status: &str) {
        if !self.access_events_enabled() {
            return;
        }
        self.emit(AuditEvent::DataAccess {
            timestamp: now_timestamp(),
            method: method.to_string(),
            endpoint: sanitize_endpoint(endpoint),
            status: status.to_string(),
        });
    }

    /// Record a guest code execution.
    pub fn log_code_execution(
        &self,
        code_hash: &CodeDigest,
        sandbox_mode: &str,
        status: &str,
        duration_sec: f64,
    ) {
        if !self.execution_events_enabled() {
            return;
        }
        self.emit(AuditEvent::CodeExecution {
            timestamp: now_timestamp(),
            code_hash: code_hash.as_str().to_string(),
            sandbox_mode: sandbox_mode.to_string(),
            status: status.to_string(),
            duration_sec,
        });
    }

    fn emit(&self, event: AuditEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "[Audit] Failed to serialize event");
                return;
            }
        };

        let mut state = self.lock();
        let Some(sinks) = state.as_mut() else { return };

        if let Some(file) = sinks.file.as_mut() {
            if let Err(e) = file.write_line(&line) {
                warn!(error = %e, "[Audit] Failed to write audit file");
            }
        }
        let mirrored = writeln!(sinks.mirror, "{line}").and_then(|_| sinks.mirror.flush());
        if let Err(e) = mirrored {
            warn!(error = %e, "[Audit] Failed to mirror audit event");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<AuditSinks>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_audit_file(dir: Option<&str>) -> Option<RotatingFileWriter> {
    let dir = dir.map(str::trim).filter(|d| !d.is_empty())?;
    let path = PathBuf::from(dir).join(AUDIT_FILE_NAME);
    match RotatingFileWriter::open(&path, AUDIT_MAX_BYTES, AUDIT_BACKUP_COUNT) {
        Ok(writer) => Some(writer),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "[Audit] Cannot open audit file; mirroring to stderr only");
            None
        }
    }
}
