//! The per-task run routine.
//!
//! Drives one record through `Running` into a terminal status, invoking the
//! work function on whichever scheduler is polling the run. Blocking work is
//! offloaded to `spawn_blocking`, gated by a shared semaphore so a burst of
//! blocking tasks can't exhaust the blocking pool.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::task::{ProgressReporter, TaskOutcome, TaskRegistry, TaskStatus};
use crate::worker::work::Work;

/// Cancellation handles of runs that can be cancelled.
type InFlight = Mutex<HashMap<Uuid, CancellationToken>>;

/// Runs work functions and records their outcome.
#[derive(Clone)]
pub struct Executor {
    registry: Arc<TaskRegistry>,
    blocking_slots: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

impl Executor {
    /// Create an executor writing to `registry`, allowing at most
    /// `max_blocking` blocking work functions at once.
    pub fn new(registry: Arc<TaskRegistry>, max_blocking: usize) -> Self {
        Self {
            registry,
            blocking_slots: Arc::new(Semaphore::new(max_blocking.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a cancellation handle for a run that is about to be spawned.
    pub(crate) fn track(&self, task_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.in_flight().insert(task_id, token.clone());
        token
    }

    fn release(&self, task_id: Uuid) {
        self.in_flight().remove(&task_id);
    }

    /// Signal cancellation to a tracked run.
    ///
    /// Returns `false` for unknown IDs, finished tasks, and runs without a
    /// cancellation handle (isolated workers). A `true` result means the task
    /// will be recorded as `Cancelled`.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        let token = self.in_flight().get(&task_id).cloned();
        let Some(token) = token else {
            return false;
        };

        if !self.registry.cancel_if_active(task_id, &token) {
            return false;
        }
        info!(task_id = %task_id, "Cancelled task");
        true
    }

    /// Number of runs currently holding a cancellation handle.
    pub fn cancellable_count(&self) -> usize {
        self.in_flight().len()
    }

    /// Guard that settles the task if its run is dropped before recording an
    /// outcome (runtime shut down, or the run was never polled).
    pub(crate) fn guard(&self, task_id: Uuid) -> RunGuard {
        RunGuard {
            executor: self.clone(),
            task_id,
        }
    }

    /// Run a task to completion and record its outcome.
    ///
    /// With a `cancel` token, cancellation is honored at the work's next
    /// suspension point and recorded as `Cancelled`.
    pub async fn run(
        &self,
        task_id: Uuid,
        work: Work,
        cancel: Option<CancellationToken>,
    ) -> TaskOutcome {
        let _guard = self.guard(task_id);

        if let Err(e) = self.registry.mark_running(task_id) {
            warn!(task_id = %task_id, error = %e, "Task could not be started");
            return TaskOutcome::Failure(e.to_string());
        }

        info!(task_id = %task_id, blocking = work.is_blocking(), "Starting execution of task");

        let progress = ProgressReporter::new(task_id, Arc::clone(&self.registry));
        let invocation = self.invoke(work, progress);

        let outcome = match &cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => TaskOutcome::Cancelled,
                    outcome = invocation => outcome,
                }
            }
            None => invocation.await,
        };

        self.record(task_id, outcome, cancel.as_ref())
    }

    /// Drive a task that never got a scheduler straight to `Failed`.
    pub(crate) fn fail_unstarted(&self, task_id: Uuid, reason: String) {
        self.release(task_id);
        if let Err(e) = self.registry.mark_running(task_id) {
            warn!(task_id = %task_id, error = %e, "Task could not be started");
            return;
        }
        self.record(task_id, TaskOutcome::Failure(reason), None);
    }

    /// Release the run's handle and close out a record its run left behind.
    fn settle(&self, task_id: Uuid) {
        let token = self.in_flight().remove(&task_id);

        let Some(record) = self.registry.get(task_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }

        warn!(task_id = %task_id, status = %record.status, "Task run dropped before finishing");
        if record.status == TaskStatus::Pending {
            if let Err(e) = self.registry.mark_running(task_id) {
                warn!(task_id = %task_id, error = %e, "Task could not be settled");
                return;
            }
        }
        self.record(
            task_id,
            TaskOutcome::Failure("task dropped before finishing: runtime shut down".to_string()),
            token.as_ref(),
        );
    }

    fn record(
        &self,
        task_id: Uuid,
        outcome: TaskOutcome,
        cancel: Option<&CancellationToken>,
    ) -> TaskOutcome {
        let applied = match cancel {
            Some(token) => self
                .registry
                .finish_or_cancelled(task_id, outcome.clone(), token),
            None => self
                .registry
                .finish(task_id, outcome.clone())
                .map(|()| outcome.clone()),
        };
        let outcome = match applied {
            Ok(applied) => applied,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to record task outcome");
                return outcome;
            }
        };

        match &outcome {
            TaskOutcome::Success(_) => info!(task_id = %task_id, "Task completed successfully"),
            TaskOutcome::Failure(reason) => {
                error!(task_id = %task_id, error = %reason, "Task failed")
            }
            TaskOutcome::Cancelled => info!(task_id = %task_id, "Task was cancelled"),
        }
        outcome
    }

    async fn invoke(&self, work: Work, progress: ProgressReporter) -> TaskOutcome {
        match work {
            Work::Async(f) => {
                let fut = async move { f(progress).await };
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(result) => outcome_of(result),
                    Err(panic) => TaskOutcome::Failure(panic_message(panic.as_ref())),
                }
            }
            Work::Blocking(f) => {
                let permit = match Arc::clone(&self.blocking_slots).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return TaskOutcome::Failure(format!("blocking pool closed: {e}")),
                };

                // If the run is cancelled the handle is dropped and the thread
                // finishes on its own; the permit is held until then.
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f(progress)
                });

                match handle.await {
                    Ok(result) => outcome_of(result),
                    Err(e) if e.is_panic() => {
                        TaskOutcome::Failure(panic_message(e.into_panic().as_ref()))
                    }
                    Err(e) => TaskOutcome::Failure(format!("blocking work aborted: {e}")),
                }
            }
        }
    }
}

/// Settles its task on drop, however the run ends. Created before the run is
/// spawned, so a run that is dropped without ever being polled is covered too.
pub(crate) struct RunGuard {
    executor: Executor,
    task_id: Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.executor.settle(self.task_id);
    }
}

fn outcome_of(result: crate::worker::work::WorkResult) -> TaskOutcome {
    match result {
        Ok(value) => TaskOutcome::Success(value),
        Err(e) => TaskOutcome::Failure(describe_error(&e)),
    }
}

/// Render the full cause chain, plus the backtrace when one was captured.
fn describe_error(e: &anyhow::Error) -> String {
    let mut message = format!("{e:#}");
    let backtrace = e.backtrace();
    if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
        message.push_str(&format!("\n\nBacktrace:\n{backtrace}"));
    }
    message
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    };
    format!("task panicked: {detail}")
}
