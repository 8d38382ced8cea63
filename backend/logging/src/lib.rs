//! Audit trail and diagnostic logging for the lmsguard trust boundary.
//!
//! Handles the FERPA audit sink (JSON Lines, size rotation, stderr mirror),
//! PII sanitization of diagnostic context, and the `tracing` subscriber setup.

pub mod audit;
pub mod diagnostics;
pub mod logger;
pub mod redact;
pub mod rotating;

pub use audit::{
    sanitize_endpoint, AuditEvent, AuditLogger, CodeDigest, AUDIT_BACKUP_COUNT, AUDIT_FILE_NAME,
    AUDIT_MAX_BYTES,
};
pub use diagnostics::DiagnosticLog;
pub use logger::init_logger;
pub use redact::{redact_sensitive_data, sanitize_url, ContextSanitizer};
pub use rotating::RotatingFileWriter;
