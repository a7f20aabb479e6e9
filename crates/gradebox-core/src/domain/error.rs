//! Domain-level error taxonomy for gradebox.

use gradebox_state::StorageError;

use crate::domain::environment::ConfigMismatchError;
use crate::domain::submission::SubmissionStatus;
use crate::instrument::InstrumentationError;
use crate::sandbox::SandboxError;
use crate::unit::CompileError;

/// gradebox domain errors.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("instrumentation error: {0}")]
    Instrumentation(#[from] InstrumentationError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("rubric not found: {assignment_id}{}", .version.map(|v| format!(" v{v}")).unwrap_or_default())]
    RubricNotFound {
        assignment_id: String,
        version: Option<u32>,
    },

    #[error("rubric {assignment_id} v{version} has no enabled weight")]
    EmptyRubric { assignment_id: String, version: u32 },

    #[error("invalid rubric {assignment_id}: {}", .violations.join("; "))]
    InvalidRubric {
        assignment_id: String,
        violations: Vec<String>,
    },

    #[error("rubric {assignment_id} v{version} already published")]
    DuplicateRubric { assignment_id: String, version: u32 },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error(transparent)]
    ConfigMismatch(#[from] ConfigMismatchError),

    #[error("invalid submission transition: {from} -> {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("missing outcome for criterion {0}")]
    MissingOutcome(String),

    #[error("duplicate outcome for criterion {0}")]
    DuplicateOutcome(String),

    #[error("outcome for criterion {0} which is not enabled in the rubric")]
    UnexpectedOutcome(String),

    #[error("run {0} cancelled")]
    Cancelled(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for GradeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RubricNotFound {
                assignment_id,
                version,
            } => GradeError::RubricNotFound {
                assignment_id,
                version,
            },
            StorageError::DuplicateRubric {
                assignment_id,
                version,
            } => GradeError::DuplicateRubric {
                assignment_id,
                version,
            },
            other => GradeError::Storage(other),
        }
    }
}

/// Result type for gradebox domain operations.
pub type Result<T> = std::result::Result<T, GradeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_rubric_errors_map_to_domain_variants() {
        let err: GradeError = StorageError::RubricNotFound {
            assignment_id: "hexgrid".to_string(),
            version: None,
        }
        .into();
        assert!(matches!(err, GradeError::RubricNotFound { .. }));
        assert_eq!(err.to_string(), "rubric not found: hexgrid");

        let err: GradeError = StorageError::DuplicateRubric {
            assignment_id: "hexgrid".to_string(),
            version: 2,
        }
        .into();
        assert!(matches!(err, GradeError::DuplicateRubric { version: 2, .. }));

        let err: GradeError = StorageError::LockPoisoned.into();
        assert!(matches!(err, GradeError::Storage(_)));
    }

    #[test]
    fn invalid_rubric_lists_violations() {
        let err = GradeError::InvalidRubric {
            assignment_id: "hexgrid".to_string(),
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "invalid rubric hexgrid: a; b");
    }

    #[test]
    fn transition_error_names_both_states() {
        let err = GradeError::InvalidTransition {
            from: SubmissionStatus::Graded,
            to: SubmissionStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid submission transition: graded -> running"
        );
    }
}
