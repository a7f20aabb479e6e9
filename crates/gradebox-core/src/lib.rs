//! gradebox core library
//!
//! Grades student submissions against versioned rubrics by running every
//! criterion in an isolated sandbox process:
//!
//! - [`unit`]: unit-assembly compiler, IR and interpreter
//! - [`instrument`]: cooperative timeout checkpoints
//! - [`sandbox`]: worker pool, process executor, outcome classification
//! - [`rubric_engine`], [`orchestrator`], [`aggregate`]: the grading pipeline
//! - [`service`]: submission intake, report retrieval, cancellation

pub mod aggregate;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod instrument;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod rubric_engine;
pub mod sandbox;
pub mod service;
pub mod telemetry;
pub mod unit;

pub use aggregate::{aggregate, compile_failure_report};
pub use cancel::CancelToken;
pub use config::GraderConfig;
pub use domain::{
    ConfigMismatchError, Criterion, CriterionScore, CustomCheck, ExecutionDescriptor,
    ExecutionEnvironment, GradeError, Outcome, OutcomeResult, Predicate, ReasonCode,
    ReportStatus, Result, Rubric, RubricDraft, ScoreReport, Submission, SubmissionStatus,
};
pub use instrument::{
    apply_hooks, instrument, InstrumentationCache, InstrumentationError, InstrumentedUnit,
};
pub use orchestrator::Orchestrator;
pub use rubric_engine::{list_criteria, RubricEngine};
pub use sandbox::{SandboxError, SandboxExecutor, WorkerPool};
pub use service::{GradingService, ReportLookup};
pub use unit::{compile_unit, CompileError, Unit};

pub use gradebox_state::{MemoryRubricStore, MemoryRunStore, RunId};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
