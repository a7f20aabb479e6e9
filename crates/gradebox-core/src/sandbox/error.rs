//! Error types for the sandbox module.

/// Errors produced by the sandbox layer.
///
/// Timeouts, faults and resource exhaustion inside the child are not
/// errors: they are classified into outcomes. These are failures of the
/// sandbox machinery itself, plus cancellation.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("failed to spawn sandbox {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("sandbox protocol error: {0}")]
    Protocol(String),

    #[error("sandbox run cancelled")]
    Cancelled,

    #[error("worker pool closed")]
    PoolClosed,

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Protocol(err.to_string())
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;
