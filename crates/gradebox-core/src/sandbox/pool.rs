//! Worker pool of isolation slots.
//!
//! Each sandbox process holds exactly one slot for its whole lifetime.
//! Slots are acquired whole and returned when the [`IsolationSlot`] drops.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::error::{SandboxError, SandboxResult};

#[derive(Debug)]
struct Occupancy {
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

/// Bounded pool of process slots shared by all grading runs.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    occupancy: Arc<Occupancy>,
}

/// One held slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct IsolationSlot {
    _permit: OwnedSemaphorePermit,
    occupancy: Arc<Occupancy>,
}

impl Drop for IsolationSlot {
    fn drop(&mut self) {
        self.occupancy.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(capacity: usize) -> SandboxResult<Self> {
        if capacity == 0 {
            return Err(SandboxError::InvalidConfig(
                "worker pool needs at least one slot".to_string(),
            ));
        }
        Ok(Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            occupancy: Arc::new(Occupancy {
                in_use: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        })
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> SandboxResult<IsolationSlot> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::PoolClosed)?;
        let now = self.occupancy.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(now, Ordering::SeqCst);
        Ok(IsolationSlot {
            _permit: permit,
            occupancy: Arc::clone(&self.occupancy),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Highest number of slots held at once since creation.
    pub fn peak_in_use(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }

    /// Stop handing out slots; pending and future `acquire` calls fail.
    pub fn close(&self) {
        self.slots.close();
    }
}
