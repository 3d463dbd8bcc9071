//! The authoritative in-memory store of task records.
//!
//! Every mutation and every scan goes through a single mutex. Creation is
//! callable from plain synchronous code, so the lock is `std::sync::Mutex`
//! and is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::kind::TaskType;
use crate::task::state::{TaskOutcome, TaskRecord, TaskStatus};

/// Default broadcast channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast whenever a record is created or changes status.
#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: Uuid,
    pub owner_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    fn of(record: &TaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            owner_id: record.owner_id.clone(),
            task_type: record.task_type.clone(),
            status: record.status,
            at: Utc::now(),
        }
    }
}

/// In-memory store of task records.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, TaskRecord>>,
    tx: broadcast::Sender<TaskEvent>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty registry with a custom event channel capacity.
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tasks: Mutex::new(HashMap::new()),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, TaskRecord>> {
        // A panic while holding the lock can't leave a record half-written:
        // every mutation is a single field assignment or a validated transition.
        match self.tasks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Subscribe to create/transition events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }

    /// Allocate a new pending record and return its ID.
    pub fn create(
        &self,
        owner_id: impl Into<String>,
        task_type: TaskType,
        correlation_id: Option<String>,
    ) -> Uuid {
        let record = TaskRecord::new(owner_id, task_type, correlation_id);
        let task_id = record.task_id;
        let event = TaskEvent::of(&record);

        self.lock().insert(task_id, record);
        // Ok if nobody is listening
        let _ = self.tx.send(event);

        task_id
    }

    /// Point lookup. Unknown or reaped IDs are `None`.
    pub fn get(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.lock().get(&task_id).cloned()
    }

    /// All records matching the filters, newest first.
    pub fn list(&self, owner_id: Option<&str>, task_type: Option<&TaskType>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .lock()
            .values()
            .filter(|r| owner_id.is_none_or(|owner| r.owner_id == owner))
            .filter(|r| task_type.is_none_or(|kind| &r.task_type == kind))
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records
    }

    /// Mutate a record in place. Returns `None` if the ID is unknown.
    pub(crate) fn update<F, R>(&self, task_id: Uuid, f: F) -> Option<R>
    where
        F: FnOnce(&mut TaskRecord) -> R,
    {
        self.lock().get_mut(&task_id).map(f)
    }

    /// Move a record to `Running`.
    pub(crate) fn mark_running(&self, task_id: Uuid) -> Result<(), TaskError> {
        let mut tasks = self.lock();
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;
        record.transition_to(TaskStatus::Running)?;
        let _ = self.tx.send(TaskEvent::of(record));
        Ok(())
    }

    /// Apply a terminal outcome to a record.
    pub(crate) fn finish(&self, task_id: Uuid, outcome: TaskOutcome) -> Result<(), TaskError> {
        let mut tasks = self.lock();
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;
        record.finish(outcome)?;
        let _ = self.tx.send(TaskEvent::of(record));
        Ok(())
    }

    /// Apply a terminal outcome, unless `cancel` has fired, in which case the
    /// record becomes `Cancelled` instead. Returns the outcome applied.
    ///
    /// Checked under the same lock as [`cancel_if_active`](Self::cancel_if_active),
    /// so a cancel that reports success always ends in `Cancelled`.
    pub(crate) fn finish_or_cancelled(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        let mut tasks = self.lock();
        let record = tasks
            .get_mut(&task_id)
            .ok_or(TaskError::NotFound { id: task_id })?;

        let outcome = if cancel.is_cancelled() {
            TaskOutcome::Cancelled
        } else {
            outcome
        };
        record.finish(outcome.clone())?;
        let _ = self.tx.send(TaskEvent::of(record));
        Ok(outcome)
    }

    /// Fire `cancel` if the record is not yet terminal.
    pub(crate) fn cancel_if_active(&self, task_id: Uuid, cancel: &CancellationToken) -> bool {
        let tasks = self.lock();
        let active = tasks.get(&task_id).is_some_and(|r| r.status.is_active());
        if active {
            cancel.cancel();
        }
        active
    }

    /// Replace the progress snapshot. Ignored once the record is terminal.
    pub(crate) fn set_progress(&self, task_id: Uuid, progress: serde_json::Value) -> bool {
        self.update(task_id, |record| {
            if record.is_terminal() {
                return false;
            }
            debug!(task_id = %task_id, progress = %progress, "Task progress updated");
            record.progress = Some(progress);
            true
        })
        .unwrap_or(false)
    }

    /// Remove a record.
    pub(crate) fn delete(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.lock().remove(&task_id)
    }

    /// Remove every terminal record that finished more than `max_age` ago.
    /// Returns the removed IDs.
    pub(crate) fn sweep_expired(&self, max_age: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let mut tasks = self.lock();

        let expired: Vec<Uuid> = tasks
            .values()
            .filter(|r| r.is_expired(now, max_age))
            .map(|r| r.task_id)
            .collect();

        for task_id in &expired {
            tasks.remove(task_id);
            info!(task_id = %task_id, "Cleaned up old task");
        }

        expired
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry holds no records.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Per-status counts.
    pub fn summary(&self) -> RegistrySummary {
        let tasks = self.lock();

        let mut summary = RegistrySummary::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Pending => summary.pending += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Completed => summary.completed += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Cancelled => summary.cancelled += 1,
            }
        }

        summary.total = tasks.len();
        summary
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of all records by status.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySummary {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(registry: &TaskRegistry, id: Uuid) {
        registry.mark_running(id).unwrap();
        registry
            .finish(id, TaskOutcome::Success(serde_json::json!({"ok": true})))
            .unwrap();
    }

    #[test]
    fn create_and_get() {
        let registry = TaskRegistry::new();
        let id = registry.create("user-1", TaskType::GenerateRtm, Some("proj-9".into()));

        let record = registry.get(id).unwrap();
        assert_eq!(record.owner_id, "user-1");
        assert_eq!(record.task_type, TaskType::GenerateRtm);
        assert_eq!(record.correlation_id.as_deref(), Some("proj-9"));
        assert_eq!(record.status, TaskStatus::Pending);
    }

    #[test]
    fn unknown_id_is_absent() {
        let registry = TaskRegistry::new();
        assert!(registry.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn ids_are_distinct() {
        let registry = TaskRegistry::new();
        let ids: std::collections::HashSet<Uuid> = (0..200)
            .map(|_| registry.create("u", TaskType::FileProcessing, None))
            .collect();
        assert_eq!(ids.len(), 200);
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn list_filters_and_orders_newest_first() {
        let registry = TaskRegistry::new();
        let first = registry.create("alice", TaskType::GenerateRtm, None);
        std::thread::sleep(Duration::from_millis(2));
        registry.create("bob", TaskType::GenerateRtm, None);
        std::thread::sleep(Duration::from_millis(2));
        let third = registry.create("alice", TaskType::CoverageAnalysis, None);

        let alice = registry.list(Some("alice"), None);
        assert_eq!(alice.len(), 2);
        assert_eq!(alice[0].task_id, third);
        assert_eq!(alice[1].task_id, first);

        let rtm = registry.list(Some("alice"), Some(&TaskType::GenerateRtm));
        assert_eq!(rtm.len(), 1);
        assert_eq!(rtm[0].task_id, first);

        assert_eq!(registry.list(None, None).len(), 3);
        assert!(registry.list(Some("carol"), None).is_empty());
    }

    #[test]
    fn list_is_a_snapshot() {
        let registry = TaskRegistry::new();
        let id = registry.create("alice", TaskType::GenerateRtm, None);
        let before = registry.list(None, None);
        registry.mark_running(id).unwrap();
        assert_eq!(before[0].status, TaskStatus::Pending);
    }

    #[test]
    fn transitions_go_through_state_machine() {
        let registry = TaskRegistry::new();
        let id = registry.create("u", TaskType::GenerateRtm, None);

        assert!(registry.finish(id, TaskOutcome::Cancelled).is_err());
        complete(&registry, id);
        assert!(registry.mark_running(id).is_err());

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn missing_record_transition_is_not_found() {
        let registry = TaskRegistry::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            registry.mark_running(id),
            Err(TaskError::NotFound { .. })
        ));
    }

    #[test]
    fn progress_frozen_after_terminal() {
        let registry = TaskRegistry::new();
        let id = registry.create("u", TaskType::CoverageAnalysis, None);
        registry.mark_running(id).unwrap();
        assert!(registry.set_progress(id, serde_json::json!({"step": 1})));

        complete(&registry, id);
        assert!(!registry.set_progress(id, serde_json::json!({"step": 2})));
        assert_eq!(
            registry.get(id).unwrap().progress,
            Some(serde_json::json!({"step": 1}))
        );
        assert!(!registry.set_progress(Uuid::new_v4(), serde_json::Value::Null));
    }

    #[test]
    fn sweep_removes_only_old_terminal_records() {
        let registry = TaskRegistry::new();
        let done = registry.create("u", TaskType::GenerateRtm, None);
        let running = registry.create("u", TaskType::GenerateRtm, None);
        let pending = registry.create("u", TaskType::GenerateRtm, None);
        complete(&registry, done);
        registry.mark_running(running).unwrap();

        // Too young for a one-hour threshold
        assert!(registry.sweep_expired(Duration::from_secs(3600)).is_empty());

        // Age the finished record artificially
        registry.update(done, |r| {
            r.completed_at = Some(Utc::now() - chrono::Duration::hours(2));
        });
        registry.update(pending, |r| {
            r.created_at = Utc::now() - chrono::Duration::days(30);
        });

        let removed = registry.sweep_expired(Duration::from_secs(3600));
        assert_eq!(removed, vec![done]);
        assert!(registry.get(done).is_none());
        assert!(registry.get(running).is_some());
        assert!(registry.get(pending).is_some());
    }

    #[test]
    fn delete_removes_record() {
        let registry = TaskRegistry::new();
        let id = registry.create("u", TaskType::GenerateRtm, None);
        assert!(registry.delete(id).is_some());
        assert!(registry.get(id).is_none());
        assert!(registry.delete(id).is_none());
    }

    #[test]
    fn summary_counts() {
        let registry = TaskRegistry::new();
        registry.create("u", TaskType::GenerateRtm, None);
        let b = registry.create("u", TaskType::GenerateRtm, None);
        let c = registry.create("u", TaskType::GenerateRtm, None);
        registry.mark_running(b).unwrap();
        complete(&registry, c);

        let summary = registry.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.completed, 1);
    }

    #[test]
    fn events_follow_lifecycle() {
        let registry = TaskRegistry::new();
        let mut rx = registry.subscribe();

        let id = registry.create("u", TaskType::GenerateRtm, None);
        complete(&registry, id);

        let statuses: Vec<TaskStatus> = (0..3).map(|_| rx.try_recv().unwrap().status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Pending, TaskStatus::Running, TaskStatus::Completed]
        );
    }

    #[test]
    fn cancel_decided_under_lock() {
        let registry = TaskRegistry::new();
        let id = registry.create("u", TaskType::GenerateRtm, None);
        registry.mark_running(id).unwrap();
        let token = CancellationToken::new();

        // Signal lands after the work returned but before the outcome is stored
        assert!(registry.cancel_if_active(id, &token));
        let applied = registry
            .finish_or_cancelled(id, TaskOutcome::Success(serde_json::json!(1)), &token)
            .unwrap();

        assert_eq!(applied, TaskOutcome::Cancelled);
        let record = registry.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.result.is_none());

        // Finished records can't be cancelled
        let other = CancellationToken::new();
        assert!(!registry.cancel_if_active(id, &other));
        assert!(!other.is_cancelled());
    }

    #[test]
    fn concurrent_writers_and_sweeper() {
        use std::collections::HashSet;
        use std::sync::atomic::{AtomicBool, Ordering};

        const WRITERS: usize = 8;
        const PER_WRITER: usize = 200;

        let registry = TaskRegistry::new();
        let done = AtomicBool::new(false);

        let (created, finished, swept) = std::thread::scope(|s| {
            let registry = &registry;
            let done = &done;

            let sweeper = s.spawn(move || {
                let mut swept = Vec::new();
                while !done.load(Ordering::SeqCst) {
                    swept.extend(registry.sweep_expired(Duration::ZERO));
                    let listed = registry.list(None, None);
                    assert!(listed.windows(2).all(|w| w[0].created_at >= w[1].created_at));
                }
                swept
            });

            let writers: Vec<_> = (0..WRITERS)
                .map(|w| {
                    s.spawn(move || {
                        let mut created = Vec::new();
                        let mut finished = Vec::new();
                        for i in 0..PER_WRITER {
                            let id = registry.create(format!("owner-{w}"), TaskType::FileProcessing, None);
                            registry.mark_running(id).unwrap();
                            assert!(registry.set_progress(id, serde_json::json!({"i": i})));
                            if i % 2 == 0 {
                                registry
                                    .finish(id, TaskOutcome::Success(serde_json::Value::Null))
                                    .unwrap();
                                finished.push(id);
                            }
                            created.push(id);
                        }
                        (created, finished)
                    })
                })
                .collect();

            let mut created = Vec::new();
            let mut finished = HashSet::new();
            for writer in writers {
                let (c, f) = writer.join().unwrap();
                created.extend(c);
                finished.extend(f);
            }
            done.store(true, Ordering::SeqCst);
            (created, finished, sweeper.join().unwrap())
        });

        let distinct: HashSet<Uuid> = created.iter().copied().collect();
        assert_eq!(distinct.len(), WRITERS * PER_WRITER);

        let swept: HashSet<Uuid> = swept.into_iter().collect();
        assert!(swept.is_subset(&finished));
        for id in &created {
            match registry.get(*id) {
                Some(record) => {
                    assert!(!swept.contains(id));
                    if !finished.contains(id) {
                        assert_eq!(record.status, TaskStatus::Running);
                        assert!(record.progress.is_some());
                    }
                }
                None => assert!(swept.contains(id), "record {id} lost"),
            }
        }
        assert_eq!(registry.len() + swept.len(), WRITERS * PER_WRITER);

        let per_owner = registry.list(Some("owner-3"), None);
        assert!(per_owner.iter().all(|r| r.owner_id == "owner-3"));
        assert!(per_owner.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}
