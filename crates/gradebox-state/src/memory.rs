//! In-memory storage backends
//!
//! `MemoryRubricStore` and `MemoryRunStore` satisfy the trait contracts
//! without external dependencies. They are the default backends of a
//! single-process grading deployment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryRubricStore
// ---------------------------------------------------------------------------

/// Rubric registry backed by `assignment -> (version -> record)`.
#[derive(Debug, Default)]
pub struct MemoryRubricStore {
    rubrics: Mutex<HashMap<String, BTreeMap<u32, RubricRecord>>>,
}

impl MemoryRubricStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RubricStore for MemoryRubricStore {
    async fn publish(&self, record: RubricRecord) -> StorageResult<()> {
        let mut rubrics = self.rubrics.lock()?;
        let versions = rubrics.entry(record.assignment_id.clone()).or_default();
        if versions.contains_key(&record.version) {
            return Err(StorageError::DuplicateRubric {
                assignment_id: record.assignment_id,
                version: record.version,
            });
        }
        debug!(
            assignment_id = %record.assignment_id,
            version = record.version,
            digest = %record.digest.short(),
            "rubric stored"
        );
        versions.insert(record.version, record);
        Ok(())
    }

    async fn latest(&self, assignment_id: &str) -> StorageResult<RubricRecord> {
        let rubrics = self.rubrics.lock()?;
        rubrics
            .get(assignment_id)
            .and_then(|versions| versions.values().next_back().cloned())
            .ok_or_else(|| StorageError::RubricNotFound {
                assignment_id: assignment_id.to_string(),
                version: None,
            })
    }

    async fn get(&self, assignment_id: &str, version: u32) -> StorageResult<RubricRecord> {
        let rubrics = self.rubrics.lock()?;
        rubrics
            .get(assignment_id)
            .and_then(|versions| versions.get(&version).cloned())
            .ok_or_else(|| StorageError::RubricNotFound {
                assignment_id: assignment_id.to_string(),
                version: Some(version),
            })
    }

    async fn versions(&self, assignment_id: &str) -> StorageResult<Vec<u32>> {
        let rubrics = self.rubrics.lock()?;
        Ok(rubrics
            .get(assignment_id)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SlotState {
    /// Last generation handed out
    issued: u64,
    /// Highest generation that stored a report
    completed: u64,
}

#[derive(Debug, Default)]
struct RunTables {
    runs: HashMap<RunId, RunRecord>,
    slots: HashMap<SlotKey, SlotState>,
}

/// Run store backed by a `HashMap<RunId, RunRecord>` plus per-slot
/// generation counters.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    tables: Mutex<RunTables>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn pending_mut<'a>(tables: &'a mut RunTables, run_id: &RunId) -> StorageResult<&'a mut RunRecord> {
    let record = tables
        .runs
        .get_mut(run_id)
        .ok_or_else(|| StorageError::RunNotFound {
            run_id: run_id.0.clone(),
        })?;
    if record.state != RunState::Pending {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            state: record.state.to_string(),
            expected: RunState::Pending.to_string(),
        });
    }
    Ok(record)
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, slot: &SlotKey) -> StorageResult<RunRecord> {
        let mut tables = self.tables.lock()?;
        let slot_state = tables.slots.entry(slot.clone()).or_default();
        slot_state.issued += 1;
        let record = RunRecord {
            run_id: RunId::new(),
            slot: slot.clone(),
            generation: slot_state.issued,
            state: RunState::Pending,
            report: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        tables.runs.insert(record.run_id.clone(), record.clone());
        Ok(record)
    }

    async fn complete_run(&self, run_id: &RunId, report: serde_json::Value) -> StorageResult<()> {
        let mut tables = self.tables.lock()?;
        let (slot, generation) = {
            let record = pending_mut(&mut tables, run_id)?;
            (record.slot.clone(), record.generation)
        };
        let latest = tables.slots.get(&slot).map(|s| s.completed).unwrap_or(0);

        if generation < latest {
            let record = pending_mut(&mut tables, run_id)?;
            record.state = RunState::Superseded;
            record.finished_at = Some(Utc::now());
            return Err(StorageError::StaleGeneration {
                run_id: run_id.0.clone(),
                generation,
                latest,
            });
        }

        let record = pending_mut(&mut tables, run_id)?;
        record.state = RunState::Completed;
        record.report = Some(report);
        record.finished_at = Some(Utc::now());
        tables.slots.entry(slot).or_default().completed = generation;
        Ok(())
    }

    async fn fail_run(&self, run_id: &RunId, reason: String) -> StorageResult<()> {
        let mut tables = self.tables.lock()?;
        let record = pending_mut(&mut tables, run_id)?;
        record.state = RunState::Failed;
        record.failure = Some(reason);
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn cancel_run(&self, run_id: &RunId) -> StorageResult<()> {
        let mut tables = self.tables.lock()?;
        let record = pending_mut(&mut tables, run_id)?;
        record.state = RunState::Cancelled;
        record.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let tables = self.tables.lock()?;
        tables
            .runs
            .get(run_id)
            .cloned()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })
    }

    async fn pending_runs(&self, slot: &SlotKey) -> StorageResult<Vec<RunRecord>> {
        let tables = self.tables.lock()?;
        let mut pending: Vec<RunRecord> = tables
            .runs
            .values()
            .filter(|r| &r.slot == slot && r.state == RunState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.generation);
        Ok(pending)
    }

    async fn latest_report(&self, slot: &SlotKey) -> StorageResult<Option<RunRecord>> {
        let tables = self.tables.lock()?;
        Ok(tables
            .runs
            .values()
            .filter(|r| &r.slot == slot && r.state == RunState::Completed)
            .max_by_key(|r| r.generation)
            .cloned())
    }
}
