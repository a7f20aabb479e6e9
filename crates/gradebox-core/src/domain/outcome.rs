use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of one criterion's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeResult {
    Pass,
    Fail,
    Timeout,
    Error,
}

impl std::fmt::Display for OutcomeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutcomeResult::Pass => "pass",
            OutcomeResult::Fail => "fail",
            OutcomeResult::Timeout => "timeout",
            OutcomeResult::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why an outcome is not a plain Pass/Fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// Injected checkpoint observed the budget was exhausted
    Checkpoint,
    /// Hard watchdog fired, or elapsed time exceeded the limit
    WallClock,
    Fault,
    ResourceExhausted,
    SkippedDependency,
    ConfigMismatch,
    /// Descriptor names a unit or function the submission lacks
    MissingEntry,
    Instrumentation,
    SandboxUnavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Checkpoint => "checkpoint",
            ReasonCode::WallClock => "wall-clock",
            ReasonCode::Fault => "fault",
            ReasonCode::ResourceExhausted => "resource-exhausted",
            ReasonCode::SkippedDependency => "skipped-dependency",
            ReasonCode::ConfigMismatch => "config-mismatch",
            ReasonCode::MissingEntry => "missing-entry",
            ReasonCode::Instrumentation => "instrumentation",
            ReasonCode::SandboxUnavailable => "sandbox-unavailable",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded result of running one criterion against one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub criterion_id: String,
    pub result: OutcomeResult,
    /// In [0, 1]; 1.0 for Pass, the partial fraction for a partial-credit
    /// Fail, 0.0 otherwise.
    pub credit: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub elapsed_ms: u64,
    /// Bounded diagnostic text
    #[serde(default)]
    pub diagnostic: String,
    pub finished_at: DateTime<Utc>,
}

impl Outcome {
    pub fn pass(criterion_id: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            result: OutcomeResult::Pass,
            credit: 1.0,
            reason: None,
            elapsed_ms,
            diagnostic: String::new(),
            finished_at: Utc::now(),
        }
    }

    /// A Fail with optional partial credit (clamped to [0, 1)).
    pub fn fail(
        criterion_id: impl Into<String>,
        credit: f64,
        elapsed_ms: u64,
        diagnostic: impl Into<String>,
    ) -> Self {
        let credit = if credit.is_finite() {
            credit.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            criterion_id: criterion_id.into(),
            result: OutcomeResult::Fail,
            credit,
            reason: None,
            elapsed_ms,
            diagnostic: diagnostic.into(),
            finished_at: Utc::now(),
        }
    }

    pub fn timeout(
        criterion_id: impl Into<String>,
        reason: ReasonCode,
        elapsed_ms: u64,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            result: OutcomeResult::Timeout,
            credit: 0.0,
            reason: Some(reason),
            elapsed_ms,
            diagnostic: diagnostic.into(),
            finished_at: Utc::now(),
        }
    }

    pub fn error(
        criterion_id: impl Into<String>,
        reason: ReasonCode,
        elapsed_ms: u64,
        diagnostic: impl Into<String>,
    ) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            result: OutcomeResult::Error,
            credit: 0.0,
            reason: Some(reason),
            elapsed_ms,
            diagnostic: diagnostic.into(),
            finished_at: Utc::now(),
        }
    }

    pub fn at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self
    }

    pub fn is_pass(&self) -> bool {
        self.result == OutcomeResult::Pass
    }
}
