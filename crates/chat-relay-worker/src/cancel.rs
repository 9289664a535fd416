//! Registry of cancelled job ids.
//!
//! Writers are the cancel endpoint; readers are executors polling between
//! upstream records. Entries are not garbage-collected: ids are small and
//! bounded in practice by job throughput over the TTL window.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelRegistry {
    cancelled: Arc<RwLock<HashSet<String>>>,
}

impl CancelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job cancelled. Idempotent.
    pub fn cancel(&self, job_id: &str) {
        self.cancelled.write().insert(job_id.to_string());
    }

    /// Whether the job has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self, job_id: &str) -> bool {
        self.cancelled.read().contains(job_id)
    }

    /// Number of cancelled ids currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cancelled.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cancelled.read().is_empty()
    }
}
