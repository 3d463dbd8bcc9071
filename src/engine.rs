//! Caller-facing façade over registry, dispatch, executor and reaper.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::task::{RegistrySummary, TaskRecord, TaskRegistry, TaskType};
use crate::worker::dispatch;
use crate::worker::{Executor, Reaper, Work};

/// How often `wait_for_completion` re-reads the record.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Background task engine.
///
/// Hand it a [`Work`] and get back an ID immediately; the work runs on the
/// caller's runtime if one is actively driving it, or on a dedicated worker
/// thread if not.
/// Outcomes are only observable by polling.
pub struct TaskEngine {
    config: EngineConfig,
    registry: Arc<TaskRegistry>,
    executor: Executor,
    reaper: Reaper,
}

impl TaskEngine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(TaskRegistry::with_event_capacity(config.event_capacity));
        Self::with_registry(config, registry)
    }

    /// Build an engine from `OFFLOAD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(EngineConfig::from_env()?))
    }

    /// Build an engine around an existing registry.
    pub fn with_registry(config: EngineConfig, registry: Arc<TaskRegistry>) -> Self {
        let executor = Executor::new(Arc::clone(&registry), config.max_blocking_tasks);
        let reaper = Reaper::new(Arc::clone(&registry));
        Self {
            config,
            registry,
            executor,
            reaper,
        }
    }

    /// Register a task and start it in the background. Never blocks on the
    /// work and never fails.
    pub fn create_task(
        &self,
        work: Work,
        owner_id: impl Into<String>,
        task_type: impl Into<TaskType>,
        correlation_id: Option<String>,
    ) -> Uuid {
        let owner_id = owner_id.into();
        let task_type = task_type.into();

        let task_id = self
            .registry
            .create(owner_id.as_str(), task_type.clone(), correlation_id);

        let strategy = dispatch::select();
        info!(
            task_id = %task_id,
            owner_id = %owner_id,
            task_type = %task_type,
            mode = ?strategy.mode(),
            "Created background task"
        );
        strategy.dispatch(&self.executor, task_id, work);

        task_id
    }

    /// Snapshot of a task, or `None` for unknown/reaped IDs.
    pub fn get_status(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.registry.get(task_id)
    }

    /// Snapshots matching the filters, newest first.
    pub fn list_tasks(&self, owner_id: Option<&str>, task_type: Option<&TaskType>) -> Vec<TaskRecord> {
        self.registry.list(owner_id, task_type)
    }

    /// Request cancellation. Only tasks running on the caller's runtime can
    /// be cancelled; isolated tasks and finished tasks return `false`.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        self.executor.cancel(task_id)
    }

    /// Remove finished tasks older than `max_age`. Returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.reaper.sweep(max_age)
    }

    pub fn sweep_hours(&self, max_age_hours: u64) -> usize {
        self.sweep(Duration::from_secs(max_age_hours.saturating_mul(3600)))
    }

    /// Sweep using the configured retention.
    pub fn sweep_expired(&self) -> usize {
        self.sweep(self.config.retention)
    }

    /// Poll until the task is terminal or `timeout` elapses.
    ///
    /// Returns the final snapshot, or `None` on timeout or unknown ID.
    pub async fn wait_for_completion(&self, task_id: Uuid, timeout: Duration) -> Option<TaskRecord> {
        let poll = async {
            loop {
                let record = self.registry.get(task_id)?;
                if record.is_terminal() {
                    return Some(record);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll).await.ok().flatten()
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Handle for periodic sweeps (see [`crate::worker::spawn_reaper_task`]).
    pub fn reaper(&self) -> Reaper {
        self.reaper.clone()
    }

    pub fn summary(&self) -> RegistrySummary {
        self.registry.summary()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for TaskEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
