use chrono::{DateTime, Utc};
use gradebox_state::{ContentDigest, RunId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::Result;
use super::outcome::{OutcomeResult, ReasonCode};

/// Final status of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Graded,
    Failed,
}

/// One row of the per-criterion breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub criterion_id: String,
    pub weight: f64,
    pub result: OutcomeResult,
    pub credit: f64,
    /// weight × credit
    pub earned: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub diagnostic: String,
}

/// Reproducible aggregation of outcomes into a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub submission_id: Uuid,
    pub run_id: RunId,
    pub assignment_id: String,
    pub rubric_version: u32,
    pub rubric_digest: String,
    pub status: ReportStatus,
    /// Normalised to [0, 1]
    pub total_score: f64,
    pub earned_weight: f64,
    pub total_weight: f64,
    pub breakdown: Vec<CriterionScore>,
    /// Run-level failure diagnostic (compile errors)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl ScoreReport {
    pub fn is_graded(&self) -> bool {
        self.status == ReportStatus::Graded
    }

    /// Per-result counts as (pass, fail, timeout, error).
    pub fn tally(&self) -> (usize, usize, usize, usize) {
        let count = |r: OutcomeResult| self.breakdown.iter().filter(|s| s.result == r).count();
        (
            count(OutcomeResult::Pass),
            count(OutcomeResult::Fail),
            count(OutcomeResult::Timeout),
            count(OutcomeResult::Error),
        )
    }

    /// Digest over what was scored: rubric digest, status and each
    /// criterion's result, credit and reason. Timings and diagnostics are
    /// excluded, so re-grading the same submission reproduces it.
    pub fn fingerprint(&self) -> Result<ContentDigest> {
        let rows: Vec<_> = self
            .breakdown
            .iter()
            .map(|s| (&s.criterion_id, s.result, s.credit.to_bits(), s.reason))
            .collect();
        let content = (&self.rubric_digest, self.status, rows);
        Ok(ContentDigest::of_json(&content)?)
    }
}
