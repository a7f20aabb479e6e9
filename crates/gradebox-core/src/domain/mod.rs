//! Domain models for gradebox.
//!
//! Canonical definitions for the core entities:
//! - `Submission`: a student's named source units and their lifecycle
//! - `Rubric` / `Criterion`: versioned grading criteria per assignment
//! - `Predicate`: closed set of expected-outcome checks
//! - `Outcome`: recorded result of one criterion run
//! - `ScoreReport`: reproducible aggregation of outcomes
//! - `ExecutionEnvironment`: headless flag bundle for GUI criteria
//! - `ExecutionHooks`: per-criterion rewrites of individual functions

pub mod environment;
pub mod error;
pub mod hooks;
pub mod outcome;
pub mod predicate;
pub mod report;
pub mod rubric;
pub mod submission;

// Re-export main types and errors
pub use environment::{ConfigMismatchError, ExecutionEnvironment};
pub use error::{GradeError, Result};
pub use hooks::{ExecutionHooks, Substitution};
pub use outcome::{Outcome, OutcomeResult, ReasonCode};
pub use predicate::{CustomCheck, Predicate, RequiredFunction, Verdict};
pub use report::{CriterionScore, ReportStatus, ScoreReport};
pub use rubric::{Criterion, ExecutionDescriptor, Rubric, RubricDraft, Scoring, MIN_TIMEOUT_MS};
pub use submission::{Submission, SubmissionStatus};
