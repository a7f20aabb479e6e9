//! Grading service: submission intake, report retrieval and cancellation.
//!
//! Each submission becomes a run in the [`RunStore`] and grades on its own
//! tokio task. Runs of different submissions proceed in parallel; the
//! worker pool inside the executor bounds how many sandboxes exist at once.
//!
//! A run's rubric is pinned at intake, so publishing a new version only
//! affects later submissions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use gradebox_state::{RunId, RunState, RunStore, SlotKey, StorageError};
use tracing::{debug, info, warn, Instrument};

use crate::cancel::CancelToken;
use crate::domain::{GradeError, Result, ScoreReport, Submission};
use crate::metrics::METRICS;
use crate::obs;
use crate::orchestrator::Orchestrator;
use crate::rubric_engine::RubricEngine;

/// Answer to `get_score_report`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportLookup {
    Ready(ScoreReport),
    Pending,
    NotFound,
    /// The run aborted without a report (missing or empty rubric, ...)
    Failed { reason: String },
    /// Cancelled explicitly, by a resubmission, or superseded by a newer run
    Cancelled,
}

type Done = Shared<BoxFuture<'static, ()>>;

struct ActiveRun {
    cancel: CancelToken,
    done: Option<Done>,
}

#[derive(Clone)]
pub struct GradingService {
    orchestrator: Arc<Orchestrator>,
    rubrics: RubricEngine,
    runs: Arc<dyn RunStore>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl GradingService {
    pub fn new(orchestrator: Orchestrator, rubrics: RubricEngine, runs: Arc<dyn RunStore>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            rubrics,
            runs,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn rubrics(&self) -> &RubricEngine {
        &self.rubrics
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Accept a submission and start grading it in the background.
    ///
    /// Older pending runs for the same (owner, assignment) are cancelled.
    /// A missing rubric does not fail the call; it is recorded on the run
    /// and reported as `ReportLookup::Failed`.
    pub async fn submit(
        &self,
        owner_id: &str,
        assignment_id: &str,
        units: BTreeMap<String, String>,
    ) -> Result<RunId> {
        let slot = SlotKey::new(owner_id, assignment_id);
        let record = self.runs.create_run(&slot).await?;
        let run_id = record.run_id.clone();

        for older in self.runs.pending_runs(&slot).await? {
            if older.run_id != run_id && self.cancel_with(&older.run_id, "resubmitted").await? {
                debug!(run_id = %older.run_id, superseded_by = %run_id, "older run cancelled");
            }
        }

        let rubric = match self.rubrics.load_rubric(assignment_id).await {
            Ok(rubric) => rubric,
            Err(e) => {
                obs::emit_run_failed(&run_id.to_string(), &e);
                self.runs.fail_run(&run_id, e.to_string()).await?;
                return Ok(run_id);
            }
        };

        let cancel = CancelToken::new();
        self.lock_active()?.insert(
            run_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                done: None,
            },
        );

        let mut submission = Submission::new(owner_id, assignment_id, units);
        let orchestrator = Arc::clone(&self.orchestrator);
        let runs = Arc::clone(&self.runs);
        let active = Arc::clone(&self.active);
        let task_run_id = run_id.clone();
        let generation = record.generation;
        let span = obs::RunSpan::span(&run_id.to_string());

        obs::emit_run_started(
            &run_id.to_string(),
            owner_id,
            assignment_id,
            rubric.version(),
        );
        let handle = tokio::spawn(
            async move {
                let outcome = orchestrator
                    .grade_submission(&mut submission, rubric, &task_run_id, &cancel)
                    .await;
                settle(runs.as_ref(), &task_run_id, &submission, generation, outcome).await;
                if let Ok(mut active) = active.lock() {
                    active.remove(&task_run_id);
                }
                METRICS.flush();
            }
            .instrument(span),
        );

        let done: Done = handle.map(|_| ()).boxed().shared();
        if let Some(entry) = self.lock_active()?.get_mut(&run_id) {
            entry.done = Some(done);
        }
        Ok(run_id)
    }

    /// Current state of a run's report.
    pub async fn get_score_report(&self, run_id: &RunId) -> Result<ReportLookup> {
        let record = match self.runs.get_run(run_id).await {
            Ok(record) => record,
            Err(StorageError::RunNotFound { .. }) => return Ok(ReportLookup::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(match record.state {
            RunState::Pending => ReportLookup::Pending,
            RunState::Completed => match record.report {
                Some(value) => ReportLookup::Ready(serde_json::from_value(value)?),
                None => ReportLookup::Failed {
                    reason: "completed run has no report".to_string(),
                },
            },
            RunState::Failed => ReportLookup::Failed {
                reason: record.failure.unwrap_or_default(),
            },
            RunState::Cancelled | RunState::Superseded => ReportLookup::Cancelled,
        })
    }

    /// Cancel a pending run. Returns `false` when it had already finished.
    ///
    /// The record is marked cancelled before the sandbox is signalled, so a
    /// result racing in afterwards is rejected by the store.
    pub async fn cancel(&self, run_id: &RunId) -> Result<bool> {
        self.cancel_with(run_id, "requested").await
    }

    /// Wait until a run's task has finished. Returns at once for unknown or
    /// already finished runs.
    pub async fn wait(&self, run_id: &RunId) -> Result<()> {
        let done = self
            .lock_active()?
            .get(run_id)
            .and_then(|entry| entry.done.clone());
        if let Some(done) = done {
            done.await;
        }
        Ok(())
    }

    /// Newest stored report for an (owner, assignment) slot.
    pub async fn latest_report(
        &self,
        owner_id: &str,
        assignment_id: &str,
    ) -> Result<Option<ScoreReport>> {
        let slot = SlotKey::new(owner_id, assignment_id);
        match self.runs.latest_report(&slot).await? {
            Some(record) => match record.report {
                Some(value) => Ok(Some(serde_json::from_value(value)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn cancel_with(&self, run_id: &RunId, reason: &str) -> Result<bool> {
        match self.runs.cancel_run(run_id).await {
            Ok(()) => {}
            Err(StorageError::InvalidRunState { .. }) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let token = self
            .lock_active()?
            .get(run_id)
            .map(|entry| entry.cancel.clone());
        if let Some(token) = token {
            token.cancel();
        }
        obs::emit_run_cancelled(&run_id.to_string(), reason);
        Ok(true)
    }

    fn lock_active(&self) -> Result<std::sync::MutexGuard<'_, HashMap<RunId, ActiveRun>>> {
        self.active
            .lock()
            .map_err(|_| GradeError::Storage(StorageError::LockPoisoned))
    }
}

/// Record the end of a run in the store.
async fn settle(
    runs: &dyn RunStore,
    run_id: &RunId,
    submission: &Submission,
    generation: u64,
    outcome: Result<ScoreReport>,
) {
    let id = run_id.to_string();
    let stored = match outcome {
        Ok(report) => match serde_json::to_value(&report) {
            Ok(value) => runs.complete_run(run_id, value).await,
            Err(e) => runs.fail_run(run_id, e.to_string()).await,
        },
        // Whoever cancelled already updated the record.
        Err(GradeError::Cancelled(_)) => return,
        Err(e) => {
            obs::emit_run_failed(&id, &e);
            runs.fail_run(run_id, e.to_string()).await
        }
    };

    match stored {
        Ok(()) => obs::emit_report_stored(
            &id,
            &submission.owner_id,
            &submission.assignment_id,
            generation,
        ),
        Err(StorageError::StaleGeneration { latest, .. }) => {
            info!(run_id = %id, generation, latest, "newer run already reported, result discarded");
        }
        Err(StorageError::InvalidRunState { state, .. }) => {
            debug!(run_id = %id, %state, "run settled elsewhere, result discarded");
        }
        Err(e) => warn!(run_id = %id, error = %e, "failed to store run result"),
    }
}
