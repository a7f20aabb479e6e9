//! Rubric engine: publication and snapshot lookup of versioned rubrics.
//!
//! Published rubrics live in a [`RubricStore`] as JSON. Every load hands out
//! a fresh `Arc<Rubric>` snapshot; a run keeps its snapshot for its whole
//! lifetime, so publishing a newer version never affects an in-flight run.

use std::sync::Arc;

use chrono::Utc;
use gradebox_state::{ContentDigest, RubricRecord, RubricStore};
use tracing::info;

use crate::domain::{Criterion, Result, Rubric, RubricDraft};

#[derive(Clone)]
pub struct RubricEngine {
    store: Arc<dyn RubricStore>,
}

impl RubricEngine {
    pub fn new(store: Arc<dyn RubricStore>) -> Self {
        Self { store }
    }

    /// Validate and publish a draft.
    ///
    /// Fails with `InvalidRubric` for a bad draft and `DuplicateRubric` when
    /// the (assignment, version) pair already exists.
    pub async fn publish(&self, draft: RubricDraft) -> Result<Arc<Rubric>> {
        let rubric = draft.seal()?;
        let body = serde_json::to_value(&rubric)?;
        let record = RubricRecord {
            assignment_id: rubric.assignment_id().to_string(),
            version: rubric.version(),
            digest: ContentDigest::of_json(&body)?,
            body,
            published_at: Utc::now(),
        };
        self.store.publish(record).await?;

        info!(
            event = "rubric.published",
            assignment_id = %rubric.assignment_id(),
            version = rubric.version(),
            digest = %&rubric.digest()[..12],
            criteria = rubric.criteria().len(),
        );
        Ok(Arc::new(rubric))
    }

    /// Latest published version for an assignment.
    pub async fn load_rubric(&self, assignment_id: &str) -> Result<Arc<Rubric>> {
        let record = self.store.latest(assignment_id).await?;
        Self::snapshot(record)
    }

    /// A pinned version.
    pub async fn load_version(&self, assignment_id: &str, version: u32) -> Result<Arc<Rubric>> {
        let record = self.store.get(assignment_id, version).await?;
        Self::snapshot(record)
    }

    /// Published versions, ascending.
    pub async fn versions(&self, assignment_id: &str) -> Result<Vec<u32>> {
        Ok(self.store.versions(assignment_id).await?)
    }

    fn snapshot(record: RubricRecord) -> Result<Arc<Rubric>> {
        let rubric: Rubric = serde_json::from_value(record.body)?;
        rubric.verify_digest()?;
        Ok(Arc::new(rubric))
    }
}

/// Enabled criteria in rubric order.
pub fn list_criteria(rubric: &Rubric) -> Vec<&Criterion> {
    rubric.enabled_criteria().collect()
}
