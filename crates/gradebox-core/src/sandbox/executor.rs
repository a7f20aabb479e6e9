//! Sandboxed executor: one fresh `gradebox-sandbox` process per criterion.
//!
//! The child runs with a cleared environment in a throwaway working
//! directory. Only GUI criteria get the headless flag bundle. A hard
//! wall-clock watchdog (criterion timeout plus grace) kills the child no
//! matter what the program is doing, so it also covers runs without
//! checkpoints and programs blocked inside a single instruction.
//!
//! Output past the capture cap fails the criterion outright: a truncated
//! stream is never handed to the predicate as if it were the whole answer.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::capture::{bound_diagnostic, read_capped, Captured};
use super::error::{SandboxError, SandboxResult};
use super::pool::WorkerPool;
use super::protocol::{self, SandboxRequest};
use crate::cancel::CancelToken;
use crate::domain::{Criterion, ExecutionEnvironment, Outcome, ReasonCode};
use crate::instrument::InstrumentedUnit;
use crate::metrics::METRICS;
use crate::unit::{Invocation, VmLimits};

/// Executor settings, usually derived from `GraderConfig`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Path of the `gradebox-sandbox` binary
    pub program: PathBuf,
    /// Added to the criterion timeout to form the hard limit
    pub watchdog_grace: Duration,
    pub output_cap: usize,
    pub diagnostic_cap: usize,
    pub limits: VmLimits,
}

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    /// Killed by a signal not sent by us
    Signaled,
    /// Killed by the hard watchdog
    WatchdogKilled,
}

/// Raw result of one sandbox process.
#[derive(Debug, Clone)]
pub struct RawExecution {
    pub termination: Termination,
    pub stdout: Captured,
    pub stderr: Captured,
    pub elapsed: Duration,
    /// Calls recorded by logging hooks; empty unless the child exited
    pub invocations: Vec<Invocation>,
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    Watchdog,
    Cancelled,
}

/// Spawns and supervises sandbox processes.
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    settings: ExecutorSettings,
    pool: WorkerPool,
}

impl SandboxExecutor {
    pub fn new(settings: ExecutorSettings, pool: WorkerPool) -> Self {
        Self { settings, pool }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run one criterion and classify the result.
    ///
    /// Only sandbox machinery failures and cancellation are errors; anything
    /// the program does becomes an [`Outcome`].
    pub async fn execute(
        &self,
        criterion: &Criterion,
        prepared: &InstrumentedUnit,
        environment: Option<&ExecutionEnvironment>,
        cancel: &CancelToken,
    ) -> SandboxResult<Outcome> {
        let request = SandboxRequest {
            unit: prepared.unit.as_ref().clone(),
            entry: criterion.descriptor.entry.clone(),
            args: criterion.descriptor.args.clone(),
            budget_ms: prepared.budget.map(|b| b.as_millis() as u64),
            limits: self.settings.limits,
        };
        let hard_limit = criterion.timeout() + self.settings.watchdog_grace;
        let raw = self
            .spawn_and_wait(&request, environment, hard_limit, cancel)
            .await?;
        Ok(classify(criterion, &raw, self.settings.diagnostic_cap))
    }

    /// Spawn the sandbox for `request` and wait for it, killing it at
    /// `hard_limit` or on cancellation.
    pub async fn spawn_and_wait(
        &self,
        request: &SandboxRequest,
        environment: Option<&ExecutionEnvironment>,
        hard_limit: Duration,
        cancel: &CancelToken,
    ) -> SandboxResult<RawExecution> {
        if cancel.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }
        let _slot = tokio::select! {
            slot = self.pool.acquire() => slot?,
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
        };

        let payload = serde_json::to_vec(request)?;
        let workdir = tempfile::Builder::new().prefix("gradebox-").tempdir()?;

        let mut cmd = Command::new(&self.settings.program);
        cmd.env_clear()
            .current_dir(workdir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(env) = environment {
            cmd.envs(env.vars());
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: self.settings.program.display().to_string(),
            source,
        })?;
        METRICS.inc_sandboxes_spawned();

        let missing = |stream: &str| SandboxError::Protocol(format!("child {stream} not piped"));
        let mut stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });
        let stdout_task = tokio::spawn(read_capped(stdout, self.settings.output_cap));
        let stderr_task = tokio::spawn(read_capped(stderr, self.settings.diagnostic_cap));

        let waited = tokio::select! {
            res = tokio::time::timeout(hard_limit, child.wait()) => match res {
                Ok(status) => Waited::Exited(status),
                Err(_) => Waited::Watchdog,
            },
            _ = cancel.cancelled() => Waited::Cancelled,
        };

        let termination = match waited {
            Waited::Exited(status) => {
                let status = status?;
                match status.code() {
                    Some(code) => Termination::Exited(code),
                    None => Termination::Signaled,
                }
            }
            Waited::Watchdog => {
                warn!(
                    limit_ms = hard_limit.as_millis() as u64,
                    "sandbox exceeded hard limit, killing"
                );
                child.kill().await?;
                METRICS.inc_watchdog_kills();
                Termination::WatchdogKilled
            }
            Waited::Cancelled => {
                debug!("sandbox cancelled, killing");
                child.kill().await?;
                return Err(SandboxError::Cancelled);
            }
        };
        let elapsed = started.elapsed();

        if let Ok(Err(e)) = writer.await {
            // The child may exit before reading its request.
            debug!(error = %e, "sandbox stdin write failed");
        }
        let join = |e: tokio::task::JoinError| SandboxError::Protocol(format!("capture task: {e}"));
        let stdout = stdout_task.await.map_err(join)??;
        let stderr = stderr_task.await.map_err(join)??;

        let invocations = match termination {
            Termination::Exited(_) => read_invocation_log(workdir.path()).await?,
            _ => Vec::new(),
        };

        Ok(RawExecution {
            termination,
            stdout,
            stderr,
            elapsed,
            invocations,
        })
    }
}

async fn read_invocation_log(workdir: &std::path::Path) -> SandboxResult<Vec<Invocation>> {
    match tokio::fs::read(workdir.join(protocol::INVOCATION_LOG)).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| SandboxError::Protocol(format!("invocation log: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Map a raw sandbox result onto an [`Outcome`].
///
/// A run slower than the criterion timeout is a `Timeout` whatever the
/// child reported.
pub fn classify(criterion: &Criterion, raw: &RawExecution, diagnostic_cap: usize) -> Outcome {
    let id = criterion.id.as_str();
    let elapsed_ms = raw.elapsed.as_millis() as u64;
    let limit_ms = criterion.timeout_ms;
    let bounded = |text: String| bound_diagnostic(&text, diagnostic_cap);
    let stderr = raw.stderr.text().trim().to_string();

    match raw.termination {
        Termination::WatchdogKilled => Outcome::timeout(
            id,
            ReasonCode::WallClock,
            elapsed_ms,
            bounded(format!("killed by watchdog after {elapsed_ms}ms (limit {limit_ms}ms)")),
        ),
        Termination::Exited(protocol::EXIT_SOFT_TIMEOUT) => {
            Outcome::timeout(id, ReasonCode::Checkpoint, elapsed_ms, bounded(stderr))
        }
        _ if raw.elapsed > criterion.timeout() => Outcome::timeout(
            id,
            ReasonCode::WallClock,
            elapsed_ms,
            bounded(format!("ran {elapsed_ms}ms, limit {limit_ms}ms")),
        ),
        Termination::Exited(protocol::EXIT_OK) if raw.stdout.truncated => Outcome::fail(
            id,
            0.0,
            elapsed_ms,
            bounded(format!(
                "output exceeded cap after {} bytes",
                raw.stdout.bytes.len()
            )),
        ),
        Termination::Exited(protocol::EXIT_OK) => {
            let verdict = criterion
                .predicate
                .evaluate_run(&raw.stdout.text(), &raw.invocations);
            if verdict.passed {
                return Outcome::pass(id, elapsed_ms);
            }
            Outcome::fail(
                id,
                verdict.credit,
                elapsed_ms,
                bounded(verdict.detail.unwrap_or_default()),
            )
        }
        Termination::Exited(protocol::EXIT_RESOURCE) => {
            Outcome::error(id, ReasonCode::ResourceExhausted, elapsed_ms, bounded(stderr))
        }
        Termination::Exited(protocol::EXIT_CONFIG) => {
            Outcome::error(id, ReasonCode::ConfigMismatch, elapsed_ms, bounded(stderr))
        }
        Termination::Exited(code) => Outcome::error(
            id,
            ReasonCode::Fault,
            elapsed_ms,
            bounded(format!("exit code {code}: {stderr}")),
        ),
        Termination::Signaled => Outcome::error(
            id,
            ReasonCode::Fault,
            elapsed_ms,
            bounded(format!("terminated by signal: {stderr}")),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CustomCheck, ExecutionDescriptor, OutcomeResult, Predicate, Scoring};

    fn criterion(timeout_ms: u64) -> Criterion {
        Criterion {
            id: "c".to_string(),
            weight: 1.0,
            timeout_ms,
            descriptor: ExecutionDescriptor {
                unit: "main".to_string(),
                entry: "main".to_string(),
                args: vec![],
                gui: false,
                depends_on: vec![],
                hooks: Default::default(),
            },
            predicate: Predicate::ExactMatch {
                expected: "42".to_string(),
            },
            enabled: true,
            scoring: Scoring::Partial,
        }
    }

    fn raw(termination: Termination, stdout: &str, stderr: &str, elapsed_ms: u64) -> RawExecution {
        RawExecution {
            termination,
            stdout: Captured {
                bytes: stdout.as_bytes().to_vec(),
                truncated: false,
            },
            stderr: Captured {
                bytes: stderr.as_bytes().to_vec(),
                truncated: false,
            },
            elapsed: Duration::from_millis(elapsed_ms),
            invocations: vec![],
        }
    }

    #[test]
    fn clean_exit_applies_predicate() {
        let c = criterion(1000);
        let pass = classify(&c, &raw(Termination::Exited(0), "42\n", "", 5), 256);
        assert_eq!(pass.result, OutcomeResult::Pass);

        let fail = classify(&c, &raw(Termination::Exited(0), "41\n", "", 5), 256);
        assert_eq!(fail.result, OutcomeResult::Fail);
        assert!(fail.diagnostic.contains("41"));
    }

    #[test]
    fn truncated_output_fails_without_credit() {
        let c = criterion(1000);
        let mut flooded = raw(Termination::Exited(0), "42\n", "", 5);
        flooded.stdout.truncated = true;
        let out = classify(&c, &flooded, 256);
        assert_eq!(out.result, OutcomeResult::Fail);
        assert_eq!(out.credit, 0.0);
        assert!(out.diagnostic.contains("output exceeded cap"));

        // Partial-credit predicates get nothing either.
        let mut lines = criterion(1000);
        lines.predicate = Predicate::Custom {
            check: CustomCheck::LineFraction {
                expected_lines: vec!["42".to_string()],
            },
        };
        let out = classify(&lines, &flooded, 256);
        assert_eq!(out.result, OutcomeResult::Fail);
        assert_eq!(out.credit, 0.0);
    }

    #[test]
    fn invocations_reach_the_predicate() {
        let mut c = criterion(1000);
        c.predicate = Predicate::Custom {
            check: CustomCheck::Invocations {
                function: "abs".to_string(),
                count: Some(1),
                operands: vec![],
            },
        };
        let mut logged = raw(Termination::Exited(0), "", "", 5);
        logged.invocations.push(Invocation {
            function: "abs".to_string(),
            operands: vec![-3],
        });
        assert_eq!(classify(&c, &logged, 256).result, OutcomeResult::Pass);

        logged.invocations.clear();
        assert_eq!(classify(&c, &logged, 256).result, OutcomeResult::Fail);
    }

    #[test]
    fn slow_correct_answer_is_timeout() {
        let c = criterion(100);
        let out = classify(&c, &raw(Termination::Exited(0), "42\n", "", 150), 256);
        assert_eq!(out.result, OutcomeResult::Timeout);
        assert_eq!(out.reason, Some(ReasonCode::WallClock));
    }

    #[test]
    fn soft_and_hard_timeouts_have_distinct_reasons() {
        let c = criterion(100);
        let soft = classify(
            &c,
            &raw(Termination::Exited(protocol::EXIT_SOFT_TIMEOUT), "", "checkpoint", 101),
            256,
        );
        assert_eq!(soft.reason, Some(ReasonCode::Checkpoint));

        let hard = classify(&c, &raw(Termination::WatchdogKilled, "", "", 300), 256);
        assert_eq!(hard.result, OutcomeResult::Timeout);
        assert_eq!(hard.reason, Some(ReasonCode::WallClock));
    }

    #[test]
    fn error_exit_codes_map_to_reasons() {
        let c = criterion(1000);
        let cases = [
            (protocol::EXIT_FAULT, ReasonCode::Fault),
            (protocol::EXIT_RESOURCE, ReasonCode::ResourceExhausted),
            (protocol::EXIT_CONFIG, ReasonCode::ConfigMismatch),
            (protocol::EXIT_PROTOCOL, ReasonCode::Fault),
        ];
        for (code, reason) in cases {
            let out = classify(&c, &raw(Termination::Exited(code), "", "boom", 5), 256);
            assert_eq!(out.result, OutcomeResult::Error);
            assert_eq!(out.reason, Some(reason));
        }
    }

    #[test]
    fn diagnostics_are_bounded() {
        let c = criterion(1000);
        let noisy = "e".repeat(10_000);
        let out = classify(&c, &raw(Termination::Exited(1), "", &noisy, 5), 64);
        assert!(out.diagnostic.len() <= 64);
    }
}
