use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{GradeError, Result};

/// Lifecycle of a submission within one grading run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Compiling,
    Running,
    Graded,
    Failed,
}

impl SubmissionStatus {
    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Compiling)
                | (Pending, Failed)
                | (Compiling, Running)
                | (Compiling, Failed)
                | (Running, Graded)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Graded | SubmissionStatus::Failed)
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Compiling => "compiling",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Graded => "graded",
            SubmissionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A student's code package: named source units for one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub owner_id: String,
    pub assignment_id: String,
    /// Unit name -> unit-assembly source
    pub units: BTreeMap<String, String>,
    status: SubmissionStatus,
}

impl Submission {
    pub fn new(
        owner_id: impl Into<String>,
        assignment_id: impl Into<String>,
        units: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            assignment_id: assignment_id.into(),
            units,
            status: SubmissionStatus::Pending,
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    /// Move to `next`, rejecting transitions out of terminal states and
    /// any edge not in the lifecycle.
    pub fn transition(&mut self, next: SubmissionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GradeError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> Submission {
        Submission::new("alice", "hexgrid", BTreeMap::new())
    }

    #[test]
    fn happy_path_transitions() {
        let mut s = submission();
        assert_eq!(s.status(), SubmissionStatus::Pending);
        s.transition(SubmissionStatus::Compiling).unwrap();
        s.transition(SubmissionStatus::Running).unwrap();
        s.transition(SubmissionStatus::Graded).unwrap();
        assert!(s.status().is_terminal());
    }

    #[test]
    fn graded_is_immutable() {
        let mut s = submission();
        s.transition(SubmissionStatus::Compiling).unwrap();
        s.transition(SubmissionStatus::Running).unwrap();
        s.transition(SubmissionStatus::Graded).unwrap();

        for next in [
            SubmissionStatus::Pending,
            SubmissionStatus::Compiling,
            SubmissionStatus::Running,
            SubmissionStatus::Failed,
        ] {
            assert!(s.transition(next).is_err());
        }
        assert_eq!(s.status(), SubmissionStatus::Graded);
    }

    #[test]
    fn cannot_skip_compiling() {
        let mut s = submission();
        let err = s.transition(SubmissionStatus::Running).unwrap_err();
        assert!(matches!(err, GradeError::InvalidTransition { .. }));
    }

    #[test]
    fn compile_failure_path() {
        let mut s = submission();
        s.transition(SubmissionStatus::Compiling).unwrap();
        s.transition(SubmissionStatus::Failed).unwrap();
        assert!(s.transition(SubmissionStatus::Running).is_err());
    }
}
