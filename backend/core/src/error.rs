use thiserror::Error;

/// Top-level error type for the lmsguard trust boundary.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing required credential: {0}")]
    MissingCredential(String),

    #[error("sandbox setup failed: {0}")]
    SandboxSetup(String),

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
