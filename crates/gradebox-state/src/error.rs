//! Error types for gradebox-state

use thiserror::Error;

/// Errors produced by rubric and run storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No rubric published under this assignment (and version, if given)
    #[error("rubric not found: {assignment_id}{}", .version.map(|v| format!(" v{v}")).unwrap_or_default())]
    RubricNotFound {
        assignment_id: String,
        version: Option<u32>,
    },

    /// (assignment, version) pair already published
    #[error("rubric {assignment_id} v{version} already published")]
    DuplicateRubric { assignment_id: String, version: u32 },

    /// Unknown run id
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run is not in the state the operation requires
    #[error("run {run_id} is {state}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        state: String,
        expected: String,
    },

    /// A newer generation of the same slot already stored its report
    #[error("run {run_id} (generation {generation}) superseded by generation {latest}")]
    StaleGeneration {
        run_id: String,
        generation: u64,
        latest: u64,
    },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// A backend lock was poisoned by a panicking writer
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StorageError::LockPoisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rubric_not_found_mentions_version_when_pinned() {
        let err = StorageError::RubricNotFound {
            assignment_id: "hexgrid".to_string(),
            version: Some(3),
        };
        assert_eq!(err.to_string(), "rubric not found: hexgrid v3");

        let err = StorageError::RubricNotFound {
            assignment_id: "hexgrid".to_string(),
            version: None,
        };
        assert_eq!(err.to_string(), "rubric not found: hexgrid");
    }

    #[test]
    fn stale_generation_display() {
        let err = StorageError::StaleGeneration {
            run_id: "r1".to_string(),
            generation: 1,
            latest: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("generation 1"));
        assert!(msg.contains("generation 2"));
    }
}
