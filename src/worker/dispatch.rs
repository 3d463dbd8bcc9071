//! Choosing where a task's run routine executes.
//!
//! The probe asks tokio whether a scheduler is actively driving the caller.
//! If so, the run is spawned onto it as a regular task and can be cancelled.
//! Otherwise (plain synchronous call sites, a runtime that is merely entered,
//! or a current-thread `block_on` that may return before the task is ever
//! polled) the run gets its own OS thread with a private current-thread
//! runtime that lives exactly as long as the task.

use tokio::runtime::{Builder, Handle, RuntimeFlavor};
use tracing::debug;
use uuid::Uuid;

use crate::worker::executor::Executor;
use crate::worker::work::Work;

/// Which execution strategy a task was dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Spawned onto the caller's runtime; cancellable.
    Inline,
    /// Dedicated thread with a private runtime; not cancellable.
    Isolated,
}

/// An execution strategy. Dispatching never blocks on the work and never
/// fails: problems starting the run are recorded on the task itself.
pub trait Dispatch: Send + Sync {
    /// Strategy identifier.
    fn mode(&self) -> DispatchMode;

    /// Start running `work` for `task_id` in the background.
    fn dispatch(&self, executor: &Executor, task_id: Uuid, work: Work);
}

/// Runs tasks as concurrent units on an existing runtime.
pub struct InlineDispatch {
    handle: Handle,
}

impl InlineDispatch {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Dispatch for InlineDispatch {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Inline
    }

    fn dispatch(&self, executor: &Executor, task_id: Uuid, work: Work) {
        // Track before spawning so a cancel issued right after creation
        // always finds the handle. The guard travels with the future, so the
        // record is settled even if the runtime drops it unpolled.
        let token = executor.track(task_id);
        let guard = executor.guard(task_id);
        let executor = executor.clone();
        self.handle.spawn(async move {
            let _guard = guard;
            executor.run(task_id, work, Some(token)).await;
        });
    }
}

/// Runs each task on its own thread and throwaway runtime.
pub struct IsolatedDispatch;

impl Dispatch for IsolatedDispatch {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Isolated
    }

    fn dispatch(&self, executor: &Executor, task_id: Uuid, work: Work) {
        let worker = executor.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("offload-task-{task_id}"))
            .spawn(move || {
                let runtime = Builder::new_current_thread().enable_all().build();
                match runtime {
                    Ok(runtime) => {
                        runtime.block_on(worker.run(task_id, work, None));
                    }
                    Err(e) => {
                        worker.fail_unstarted(task_id, format!("failed to build worker runtime: {e}"));
                    }
                }
            });

        if let Err(e) = spawned {
            executor.fail_unstarted(task_id, format!("failed to spawn worker thread: {e}"));
        }
    }
}

/// Handle of the runtime actively driving the caller, if any. Never panics.
///
/// A multi-thread runtime has its own workers, so being inside its context is
/// enough. A current-thread runtime only makes progress while something polls
/// it, so the caller must itself be running as one of its tasks.
pub fn probe() -> Option<Handle> {
    let handle = Handle::try_current().ok()?;
    let driven = tokio::task::try_id().is_some()
        || handle.runtime_flavor() == RuntimeFlavor::MultiThread;
    driven.then_some(handle)
}

/// Pick the strategy for a creation call happening right now.
pub fn select() -> Box<dyn Dispatch> {
    match probe() {
        Some(handle) => Box::new(InlineDispatch::new(handle)),
        None => {
            debug!("No active runtime, dispatching to isolated worker");
            Box::new(IsolatedDispatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::task::{TaskRegistry, TaskStatus, TaskType};

    #[test]
    fn no_runtime_selects_isolated() {
        assert!(probe().is_none());
        assert_eq!(select().mode(), DispatchMode::Isolated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_runtime_selects_inline() {
        assert!(probe().is_some());
        assert_eq!(select().mode(), DispatchMode::Inline);
    }

    #[tokio::test]
    async fn current_thread_task_selects_inline() {
        let mode = tokio::spawn(async { select().mode() }).await.unwrap();
        assert_eq!(mode, DispatchMode::Inline);
    }

    #[tokio::test]
    async fn current_thread_block_on_selects_isolated() {
        assert!(probe().is_none());
        assert_eq!(select().mode(), DispatchMode::Isolated);
    }

    #[test]
    fn entered_but_undriven_runtime_selects_isolated() {
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let _guard = runtime.enter();
        assert_eq!(select().mode(), DispatchMode::Isolated);

        let mode = std::thread::spawn(|| select().mode()).join().unwrap();
        assert_eq!(mode, DispatchMode::Isolated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_section_still_sees_runtime() {
        let mode = tokio::task::spawn_blocking(|| select().mode())
            .await
            .unwrap();
        assert_eq!(mode, DispatchMode::Inline);
    }

    fn unpolled_inline_task() -> (Arc<TaskRegistry>, Executor, tokio::runtime::Runtime, Uuid) {
        let registry = Arc::new(TaskRegistry::new());
        let executor = Executor::new(Arc::clone(&registry), 1);
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let id = registry.create("u", TaskType::GenerateRtm, None);

        InlineDispatch::new(runtime.handle().clone()).dispatch(
            &executor,
            id,
            Work::future(|_| async { Ok(serde_json::Value::Null) }),
        );
        (registry, executor, runtime, id)
    }

    #[test]
    fn dropped_runtime_settles_unpolled_task() {
        let (registry, executor, runtime, id) = unpolled_inline_task();
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Pending);
        assert_eq!(executor.cancellable_count(), 1);

        drop(runtime);

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.started_at.is_some());
        assert!(record.error.unwrap().contains("runtime shut down"));
        assert_eq!(executor.cancellable_count(), 0);
        assert!(!executor.cancel(id));
    }

    #[test]
    fn dropped_runtime_honors_earlier_cancel() {
        let (registry, executor, runtime, id) = unpolled_inline_task();
        assert!(executor.cancel(id));

        drop(runtime);

        let record = registry.get(id).unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(record.error.is_none());
        assert_eq!(executor.cancellable_count(), 0);
    }
}
