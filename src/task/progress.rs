//! Progress reporting handle handed to work functions.

use std::sync::Arc;

use uuid::Uuid;

use crate::task::registry::TaskRegistry;

/// Lets a running work function publish incremental progress into its own
/// task record. Cheap to clone; reports after the task is terminal are
/// dropped.
#[derive(Clone)]
pub struct ProgressReporter {
    task_id: Uuid,
    registry: Arc<TaskRegistry>,
}

impl ProgressReporter {
    pub(crate) fn new(task_id: Uuid, registry: Arc<TaskRegistry>) -> Self {
        Self { task_id, registry }
    }

    /// ID of the task this reporter writes to.
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Replace the task's progress snapshot. Returns `false` if the task is
    /// gone or already finished.
    pub fn report(&self, progress: serde_json::Value) -> bool {
        self.registry.set_progress(self.task_id, progress)
    }

    /// Convenience for the common step/total/percentage shape.
    pub fn step(&self, current_step: impl Into<String>, step: u32, total_steps: u32) -> bool {
        let percentage = if total_steps == 0 {
            100
        } else {
            u64::from(step.min(total_steps)) * 100 / u64::from(total_steps)
        };
        self.report(serde_json::json!({
            "current_step": current_step.into(),
            "step": step,
            "total_steps": total_steps,
            "percentage": percentage,
        }))
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .finish()
    }
}
