//! Structured observability hooks for grading run lifecycle events.
//!
//! - Run-scoped tracing spans via the [`RunSpan`] guard
//! - `emit_*` functions for run start, outcome recording, finish, cancel
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).

use tracing::{info, warn};

use crate::domain::{Outcome, ScoreReport};

/// Guard that enters a run-scoped span until dropped.
///
/// Only for synchronous sections; async code should attach
/// [`RunSpan::span`] with `tracing::Instrument` instead.
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: Self::span(run_id).entered(),
        }
    }

    /// Un-entered span for `.instrument(..)`.
    pub fn span(run_id: &str) -> tracing::Span {
        tracing::info_span!("gradebox.run", run_id = %run_id)
    }
}

pub fn emit_run_started(run_id: &str, owner_id: &str, assignment_id: &str, rubric_version: u32) {
    info!(
        event = "run.started",
        run_id = %run_id,
        owner_id = %owner_id,
        assignment_id = %assignment_id,
        rubric_version = rubric_version,
    );
}

pub fn emit_outcome_recorded(run_id: &str, outcome: &Outcome) {
    info!(
        event = "run.outcome_recorded",
        run_id = %run_id,
        criterion_id = %outcome.criterion_id,
        result = %outcome.result,
        credit = outcome.credit,
        reason = outcome.reason.map(|r| r.as_str()).unwrap_or("-"),
        elapsed_ms = outcome.elapsed_ms,
    );
}

/// Emit event: run finished with its score.
pub fn emit_run_finished(run_id: &str, report: &ScoreReport, duration_ms: u64) {
    let (pass, fail, timeout, error) = report.tally();
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = ?report.status,
        total_score = report.total_score,
        pass = pass,
        fail = fail,
        timeout = timeout,
        error = error,
        duration_ms = duration_ms,
    );
}

pub fn emit_report_stored(run_id: &str, owner_id: &str, assignment_id: &str, generation: u64) {
    info!(
        event = "run.report_stored",
        run_id = %run_id,
        slot = %format!("{owner_id}/{assignment_id}"),
        generation = generation,
    );
}

pub fn emit_run_cancelled(run_id: &str, reason: &str) {
    info!(event = "run.cancelled", run_id = %run_id, reason = %reason);
}

/// Run aborted before or outside grading (warning level).
pub fn emit_run_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.failed", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_outcome_recorded("test-run-id", &Outcome::pass("a", 3));
    }
}
