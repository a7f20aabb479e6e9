//! Grading orchestrator: drives one submission through compile, instrument,
//! execute and aggregate.
//!
//! Criteria run one at a time in rubric order. A criterion that errors,
//! times out or is skipped still yields an [`Outcome`]; only cancellation
//! and run-level failures (empty rubric, invalid lifecycle) abort the run.
//! Structure criteria are checked against the compiled unit and never reach
//! the sandbox.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use gradebox_state::RunId;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, compile_failure_report, nonempty_weight};
use crate::cancel::CancelToken;
use crate::config::GraderConfig;
use crate::domain::{
    Criterion, ExecutionEnvironment, GradeError, Outcome, OutcomeResult, ReasonCode, Result,
    Rubric, ScoreReport, Submission, SubmissionStatus,
};
use crate::instrument::InstrumentationCache;
use crate::metrics::METRICS;
use crate::obs;
use crate::sandbox::{bound_diagnostic, SandboxError, SandboxExecutor, WorkerPool};
use crate::unit::{compile_unit, Unit};

#[derive(Debug, Clone)]
pub struct Orchestrator {
    executor: Arc<SandboxExecutor>,
    timeout_enforcement: bool,
    environment_flags: BTreeMap<String, String>,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<SandboxExecutor>,
        timeout_enforcement: bool,
        environment_flags: BTreeMap<String, String>,
    ) -> Self {
        Self {
            executor,
            timeout_enforcement,
            environment_flags,
        }
    }

    /// Build the executor and its worker pool from a validated config.
    pub fn from_config(config: &GraderConfig) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool_slots)?;
        let executor = SandboxExecutor::new(config.executor_settings()?, pool);
        Ok(Self::new(
            Arc::new(executor),
            config.timeout_enforcement,
            config.environment.clone(),
        ))
    }

    pub fn executor(&self) -> &SandboxExecutor {
        &self.executor
    }

    pub fn timeout_enforcement(&self) -> bool {
        self.timeout_enforcement
    }

    /// Grade `submission` against a pinned rubric snapshot.
    ///
    /// Returns `EmptyRubric` before doing any work when nothing can be
    /// scored, a `Failed` report when a unit does not compile, and
    /// `Cancelled` (with no report) when `cancel` fires mid-run.
    pub async fn grade_submission(
        &self,
        submission: &mut Submission,
        rubric: Arc<Rubric>,
        run_id: &RunId,
        cancel: &CancelToken,
    ) -> Result<ScoreReport> {
        let started = Instant::now();
        let references = match nonempty_weight(&rubric).and_then(|_| rubric.reference_units()) {
            Ok(references) => references,
            Err(e) => {
                submission.transition(SubmissionStatus::Failed)?;
                return Err(e);
            }
        };

        submission.transition(SubmissionStatus::Compiling)?;
        let units = match compile_all(submission) {
            Ok(units) => units,
            Err(diagnostic) => {
                info!(run_id = %run_id, "submission failed to compile");
                submission.transition(SubmissionStatus::Failed)?;
                let diagnostic =
                    bound_diagnostic(&diagnostic, self.executor.settings().diagnostic_cap);
                let report = compile_failure_report(submission, run_id, &rubric, diagnostic);
                obs::emit_run_finished(
                    &run_id.to_string(),
                    &report,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(report);
            }
        };

        submission.transition(SubmissionStatus::Running)?;
        let mut cache = InstrumentationCache::new(self.timeout_enforcement);
        let mut results: HashMap<&str, OutcomeResult> = HashMap::new();
        let mut outcomes = Vec::new();

        for criterion in rubric.enabled_criteria() {
            let outcome = match self
                .run_criterion(criterion, &units, &references, &results, &mut cache, cancel)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    submission.transition(SubmissionStatus::Failed)?;
                    return Err(e.into_grade_error(run_id));
                }
            };
            obs::emit_outcome_recorded(&run_id.to_string(), &outcome);
            METRICS.inc_outcomes_recorded();
            results.insert(criterion.id.as_str(), outcome.result);
            outcomes.push(outcome);
        }

        if cancel.is_cancelled() {
            submission.transition(SubmissionStatus::Failed)?;
            return Err(GradeError::Cancelled(run_id.to_string()));
        }

        let report = aggregate(submission, run_id, &outcomes, &rubric)?;
        submission.transition(SubmissionStatus::Graded)?;
        METRICS.inc_runs_graded();
        obs::emit_run_finished(
            &run_id.to_string(),
            &report,
            started.elapsed().as_millis() as u64,
        );
        Ok(report)
    }

    /// Produce the outcome for one criterion. Only cancellation is an error.
    async fn run_criterion(
        &self,
        criterion: &Criterion,
        units: &HashMap<String, Arc<Unit>>,
        references: &HashMap<String, Unit>,
        results: &HashMap<&str, OutcomeResult>,
        cache: &mut InstrumentationCache,
        cancel: &CancelToken,
    ) -> std::result::Result<Outcome, Interrupted> {
        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        let id = criterion.id.as_str();
        let descriptor = &criterion.descriptor;

        let unmet: Vec<&str> = descriptor
            .depends_on
            .iter()
            .map(String::as_str)
            .filter(|dep| results.get(dep) != Some(&OutcomeResult::Pass))
            .collect();
        if !unmet.is_empty() {
            debug!(criterion = %id, ?unmet, "skipping, dependencies not passed");
            return Ok(Outcome::error(
                id,
                ReasonCode::SkippedDependency,
                0,
                format!("dependency not passed: {}", unmet.join(", ")),
            ));
        }

        if criterion.predicate.is_structural() {
            let verdict = criterion
                .predicate
                .check_structure(units.get(&descriptor.unit).map(|unit| &**unit));
            if verdict.passed {
                return Ok(Outcome::pass(id, 0));
            }
            let diagnostic = bound_diagnostic(
                &verdict.detail.unwrap_or_default(),
                self.executor.settings().diagnostic_cap,
            );
            return Ok(Outcome::fail(id, verdict.credit, 0, diagnostic));
        }

        let Some(unit) = units.get(&descriptor.unit) else {
            return Ok(Outcome::error(
                id,
                ReasonCode::MissingEntry,
                0,
                format!("submission has no unit named {}", descriptor.unit),
            ));
        };
        // A delegated entry may be absent from the submission.
        if unit.function(&descriptor.entry).is_none()
            && !descriptor.hooks.reference.contains(&descriptor.entry)
        {
            return Ok(Outcome::error(
                id,
                ReasonCode::MissingEntry,
                0,
                format!("unit {} has no function {}", unit.name, descriptor.entry),
            ));
        }

        let environment = if descriptor.gui {
            match ExecutionEnvironment::from_flags(&self.environment_flags) {
                Ok(env) => Some(env),
                Err(e) => {
                    return Ok(Outcome::error(id, ReasonCode::ConfigMismatch, 0, e.reason));
                }
            }
        } else {
            None
        };

        let reference = references.get(&descriptor.unit);
        let prepared = match cache.prepare_with_hooks(
            unit,
            &descriptor.hooks,
            reference,
            criterion.timeout(),
        ) {
            Ok(prepared) => prepared,
            Err(e) => {
                return Ok(Outcome::error(
                    id,
                    ReasonCode::Instrumentation,
                    0,
                    e.to_string(),
                ))
            }
        };

        match self
            .executor
            .execute(criterion, &prepared, environment.as_ref(), cancel)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(SandboxError::Cancelled) => Err(Interrupted),
            Err(e) => {
                warn!(criterion = %id, error = %e, "sandbox unavailable");
                let diagnostic = bound_diagnostic(&e.to_string(), self.executor.settings().diagnostic_cap);
                Ok(Outcome::error(id, ReasonCode::SandboxUnavailable, 0, diagnostic))
            }
        }
    }
}

/// The run was cancelled while a criterion was pending.
struct Interrupted;

impl Interrupted {
    fn into_grade_error(self, run_id: &RunId) -> GradeError {
        GradeError::Cancelled(run_id.to_string())
    }
}

/// Compile every unit, or return all compile errors as one diagnostic.
fn compile_all(submission: &Submission) -> std::result::Result<HashMap<String, Arc<Unit>>, String> {
    let mut units = HashMap::with_capacity(submission.units.len());
    let mut errors = Vec::new();
    for (name, source) in &submission.units {
        match compile_unit(name, source) {
            Ok(unit) => {
                units.insert(name.clone(), Arc::new(unit));
            }
            Err(e) => errors.push(e.to_string()),
        }
    }
    if errors.is_empty() {
        Ok(units)
    } else {
        Err(errors.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(units: &[(&str, &str)]) -> Submission {
        Submission::new(
            "alice",
            "hexgrid",
            units
                .iter()
                .map(|(n, s)| (n.to_string(), s.to_string()))
                .collect(),
        )
    }

    #[test]
    fn compile_all_collects_every_error() {
        let sub = submission(&[
            ("a", "fn main\n  bogus\nend\n"),
            ("b", "fn main\n  push 1\n  print\nend\n"),
            ("c", "fn main\n  jmp nowhere\nend\n"),
        ]);
        let err = compile_all(&sub).unwrap_err();
        assert_eq!(err.lines().count(), 2);
        assert!(err.starts_with("a:"));
        assert!(err.contains("\nc:"));
    }

    #[test]
    fn compile_all_keys_units_by_name() {
        let sub = submission(&[("lib", "fn f\n  push 1\n  ret\nend\n")]);
        let units = compile_all(&sub).unwrap();
        assert!(units["lib"].function("f").is_some());
    }
}
