//! gradebox-state: persistence layer for the grading pipeline
//!
//! Holds the two pieces of shared state a grading deployment needs:
//!
//! - `RubricStore`: published rubric bodies, keyed by (assignment, version)
//! - `RunStore`: grading run records with per-slot generations, so that a
//!   superseded run can never overwrite the report of a newer one
//!
//! Payloads are stored as `serde_json::Value`; the typed domain lives in
//! `gradebox-core`. In-memory backends are provided in [`memory`].

mod error;
pub mod memory;
pub mod storage_traits;

pub use error::StorageError;
pub use memory::{MemoryRubricStore, MemoryRunStore};
pub use storage_traits::{
    ContentDigest, RubricRecord, RubricStore, RunId, RunRecord, RunState, RunStore, SlotKey,
    StorageResult,
};
