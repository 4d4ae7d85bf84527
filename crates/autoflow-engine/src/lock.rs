//! Per-workflow execution lock.
//!
//! At most one run of a given workflow may be in flight in this process.
//! Acquisition never waits: a caller that finds the workflow held gets
//! `None` (or `false`) immediately and reports the run as skipped.
//!
//! The lock is an explicitly owned value, not a global. Clones share the
//! same registry, so one [`ExecutionLock`] is created per process and handed
//! to every orchestrator.
//!
//! # Example
//!
//! ```rust
//! # use autoflow_engine::lock::ExecutionLock;
//! let lock = ExecutionLock::new();
//! let guard = lock.guard("wf-1").unwrap();
//! assert!(lock.guard("wf-1").is_none());
//! drop(guard);
//! assert!(!lock.is_held("wf-1"));
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

// ---------------------------------------------------------------------------
// Lock registry
// ---------------------------------------------------------------------------

/// Concurrent set of workflow ids with a run in flight.
///
/// Cheaply cloneable (`Arc`-backed) and `Send + Sync`.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLock {
    held: Arc<DashMap<String, DateTime<Utc>>>,
}

impl ExecutionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `workflow_id` as running. Returns `false` if it
    /// already is.
    pub fn try_acquire(&self, workflow_id: &str) -> bool {
        match self.held.entry(workflow_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                debug!(workflow_id, "execution lock acquired");
                true
            }
        }
    }

    /// Release `workflow_id`. Releasing an id that is not held is a no-op.
    pub fn release(&self, workflow_id: &str) {
        if self.held.remove(workflow_id).is_some() {
            debug!(workflow_id, "execution lock released");
        }
    }

    /// Acquire and return a guard that releases on drop, including when the
    /// holding future is cancelled or a panic unwinds through it.
    pub fn guard(&self, workflow_id: &str) -> Option<RunGuard> {
        self.try_acquire(workflow_id).then(|| RunGuard {
            lock: self.clone(),
            workflow_id: workflow_id.to_string(),
        })
    }

    pub fn is_held(&self, workflow_id: &str) -> bool {
        self.held.contains_key(workflow_id)
    }

    /// When the current run of `workflow_id` took the lock.
    pub fn held_since(&self, workflow_id: &str) -> Option<DateTime<Utc>> {
        self.held.get(workflow_id).map(|entry| *entry.value())
    }

    /// Number of workflows currently running.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Scoped hold on one workflow id.
#[derive(Debug)]
pub struct RunGuard {
    lock: ExecutionLock,
    workflow_id: String,
}

impl RunGuard {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lock.release(&self.workflow_id);
    }
}
