//! Shared fixtures for gradebox-core integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use gradebox_core::domain::{
    Criterion, CustomCheck, ExecutionDescriptor, ExecutionEnvironment, Predicate, Rubric,
    RubricDraft, Scoring,
};
use gradebox_core::sandbox::{ExecutorSettings, SandboxExecutor, WorkerPool};
use gradebox_core::unit::VmLimits;
use gradebox_core::Orchestrator;

pub const SANDBOX: &str = env!("CARGO_BIN_EXE_gradebox-sandbox");

pub const PRINT_42: &str = "fn main\n  push 42\n  print\nend\n";

pub const ADD_ARGS: &str = "fn main\n  arg 0\n  arg 1\n  add\n  print\nend\n";

/// Loops forever, sleeping a little per iteration.
pub const SPIN: &str = "fn main\ntop:\n  sleep 5\n  jmp top\nend\n";

/// One instruction that outlives any test timeout.
pub const BLOCKED: &str = "fn main\n  emit \"started\"\n  sleep 30000\nend\n";

pub const DIVIDE_BY_ZERO: &str = "fn main\n  push 1\n  push 0\n  div\n  print\nend\n";

pub const RUNAWAY_RECURSION: &str = "fn main\n  call main\nend\n";

pub const RENDER: &str = "fn main\n  frame\n  frame\nend\n";

pub const HALF_LINES: &str = "fn main\n  emit \"alpha\"\n  emit \"beta\"\nend\n";

pub fn settings(grace_ms: u64) -> ExecutorSettings {
    ExecutorSettings {
        program: PathBuf::from(SANDBOX),
        watchdog_grace: Duration::from_millis(grace_ms),
        output_cap: 64 * 1024,
        diagnostic_cap: 1024,
        limits: VmLimits::default(),
    }
}

pub fn executor(slots: usize, grace_ms: u64) -> Arc<SandboxExecutor> {
    executor_with(slots, settings(grace_ms))
}

pub fn executor_with(slots: usize, settings: ExecutorSettings) -> Arc<SandboxExecutor> {
    let pool = WorkerPool::new(slots).unwrap();
    Arc::new(SandboxExecutor::new(settings, pool))
}

pub fn orchestrator(timeout_enforcement: bool, slots: usize) -> Orchestrator {
    Orchestrator::new(
        executor(slots, 300),
        timeout_enforcement,
        ExecutionEnvironment::headless_flags(),
    )
}

pub fn exact(expected: &str) -> Predicate {
    Predicate::ExactMatch {
        expected: expected.to_string(),
    }
}

pub fn line_fraction(lines: &[&str]) -> Predicate {
    Predicate::Custom {
        check: CustomCheck::LineFraction {
            expected_lines: lines.iter().map(|l| l.to_string()).collect(),
        },
    }
}

pub fn criterion(id: &str, weight: f64, unit: &str, predicate: Predicate) -> Criterion {
    Criterion {
        id: id.to_string(),
        weight,
        timeout_ms: 5_000,
        descriptor: ExecutionDescriptor {
            unit: unit.to_string(),
            entry: "main".to_string(),
            args: vec![],
            gui: false,
            depends_on: vec![],
            hooks: Default::default(),
        },
        predicate,
        enabled: true,
        scoring: Scoring::Partial,
    }
}

pub fn rubric(assignment_id: &str, version: u32, criteria: Vec<Criterion>) -> Arc<Rubric> {
    rubric_with_reference(assignment_id, version, criteria, &[])
}

pub fn rubric_with_reference(
    assignment_id: &str,
    version: u32,
    criteria: Vec<Criterion>,
    reference: &[(&str, &str)],
) -> Arc<Rubric> {
    let draft = RubricDraft {
        assignment_id: assignment_id.to_string(),
        version,
        criteria,
        reference: reference
            .iter()
            .map(|(name, src)| (name.to_string(), src.to_string()))
            .collect(),
    };
    Arc::new(draft.seal().unwrap())
}

pub fn units(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(name, src)| (name.to_string(), src.to_string()))
        .collect()
}
