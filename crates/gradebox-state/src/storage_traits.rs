//! Storage trait definitions for gradebox
//!
//! - `RubricStore`: append-only registry of published rubric bodies
//! - `RunStore`: grading run records, reports and failures
//!
//! All traits are async and backend-agnostic. In-memory backends live in
//! the `memory` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of the JSON serialization of `value`.
    ///
    /// `serde_json` emits struct fields in declaration order and `BTreeMap`
    /// keys sorted, so equal values hash equally.
    pub fn of_json<T: Serialize>(value: &T) -> StorageResult<Self> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// RubricStore
// ---------------------------------------------------------------------------

/// One published rubric version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricRecord {
    pub assignment_id: String,
    pub version: u32,
    /// Digest of `body`
    pub digest: ContentDigest,
    /// Serialized rubric
    pub body: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

/// Published rubric registry.
///
/// Guarantees:
/// - (assignment_id, version) pairs are unique; re-publishing is rejected.
/// - Records are never mutated or removed after `publish`.
/// - `latest` returns the highest version, not the most recently published.
#[async_trait]
pub trait RubricStore: Send + Sync {
    /// Publish a new rubric version.
    async fn publish(&self, record: RubricRecord) -> StorageResult<()>;

    /// Highest published version for an assignment.
    async fn latest(&self, assignment_id: &str) -> StorageResult<RubricRecord>;

    /// A specific published version.
    async fn get(&self, assignment_id: &str, version: u32) -> StorageResult<RubricRecord>;

    /// All published versions for an assignment, ascending.
    async fn versions(&self, assignment_id: &str) -> StorageResult<Vec<u32>>;
}

// ---------------------------------------------------------------------------
// RunStore
// ---------------------------------------------------------------------------

/// Unique identifier for a grading run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The (owner, assignment) pair a run grades. Resubmissions to the same
/// slot get increasing generations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub owner_id: String,
    pub assignment_id: String,
}

impl SlotKey {
    pub fn new(owner_id: impl Into<String>, assignment_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            assignment_id: assignment_id.into(),
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner_id, self.assignment_id)
    }
}

/// Lifecycle of a run record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Completed,
    Failed,
    Cancelled,
    /// A newer generation finished first; this run's report was discarded
    Superseded,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Pending)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Pending => "pending",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
            RunState::Superseded => "superseded",
        };
        f.write_str(s)
    }
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub slot: SlotKey,
    /// Monotonic per slot, starting at 1
    pub generation: u64,
    pub state: RunState,
    /// Present only when `state == Completed`
    pub report: Option<serde_json::Value>,
    /// Run-level failure diagnostic when `state == Failed`
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Grading run store.
///
/// Guarantees:
/// - `create_run` allocates the next generation for the slot.
/// - A run transitions Pending → Completed | Failed | Cancelled | Superseded
///   exactly once; terminal records are immutable.
/// - Last writer wins by generation: `complete_run` for generation `g` fails
///   with `StaleGeneration` once a generation `> g` of the same slot has
///   completed, and the stale run is marked `Superseded`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Register a new pending run for a slot.
    async fn create_run(&self, slot: &SlotKey) -> StorageResult<RunRecord>;

    /// Store the run's report.
    async fn complete_run(&self, run_id: &RunId, report: serde_json::Value) -> StorageResult<()>;

    /// Record a run-level failure (no report).
    async fn fail_run(&self, run_id: &RunId, reason: String) -> StorageResult<()>;

    /// Mark a pending run cancelled. Cancelling a terminal run is an error.
    async fn cancel_run(&self, run_id: &RunId) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Pending runs of a slot, oldest generation first.
    async fn pending_runs(&self, slot: &SlotKey) -> StorageResult<Vec<RunRecord>>;

    /// The completed run with the highest generation for a slot.
    async fn latest_report(&self, slot: &SlotKey) -> StorageResult<Option<RunRecord>>;
}
