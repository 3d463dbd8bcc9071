//! Eviction of finished task records.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use crate::task::{TaskRecord, TaskRegistry};

/// Removes terminal records past their retention.
#[derive(Clone)]
pub struct Reaper {
    registry: Arc<TaskRegistry>,
}

impl Reaper {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// Remove every terminal record that finished more than `max_age` ago.
    /// Pending and running records are never touched.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let removed = self.registry.sweep_expired(max_age).len();
        if removed > 0 {
            info!(removed, max_age_secs = max_age.as_secs(), "Swept expired tasks");
        }
        removed
    }

    /// Remove a single record now, if it has finished.
    pub fn evict(&self, task_id: Uuid) -> Option<TaskRecord> {
        let finished = self
            .registry
            .get(task_id)
            .is_some_and(|r| r.is_terminal());
        if !finished {
            return None;
        }

        let record = self.registry.delete(task_id);
        if record.is_some() {
            debug!(task_id = %task_id, "Evicted task");
        }
        record
    }
}

/// Spawn a background task that sweeps on a fixed interval.
pub fn spawn_reaper_task(
    reaper: Reaper,
    interval: Duration,
    max_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        loop {
            interval.tick().await;
            reaper.sweep(max_age);
        }
    })
}
