//! Task record and its state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TaskError;
use crate::task::kind::TaskType;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Allocated, not yet picked up by an executor.
    Pending,
    /// Work function is being invoked.
    Running,
    /// Work function returned a value.
    Completed,
    /// Work function returned an error or panicked.
    Failed,
    /// Run was cancelled before the work function finished.
    Cancelled,
}

impl TaskStatus {
    /// Check if this status allows transitioning to another status.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Completed) | (Running, Failed) | (Running, Cancelled)
        )
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task is still in flight.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// How a run ended, as produced by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Work function returned this value.
    Success(serde_json::Value),
    /// Work function failed; the message carries the rendered error chain.
    Failure(String),
    /// Run was cancelled.
    Cancelled,
}

impl TaskOutcome {
    /// The terminal status this outcome maps to.
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Success(_) => TaskStatus::Completed,
            Self::Failure(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// One unit of background work and its lifecycle state.
///
/// Callers only ever see clones of this record (snapshots); the live copy is
/// owned by the [`TaskRegistry`](crate::task::TaskRegistry).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task ID.
    pub task_id: Uuid,
    /// Principal that requested the task.
    pub owner_id: String,
    /// Optional grouping key, e.g. a project reference.
    pub correlation_id: Option<String>,
    /// What kind of work this is.
    pub task_type: TaskType,
    /// Current status.
    pub status: TaskStatus,
    /// When the record was allocated.
    pub created_at: DateTime<Utc>,
    /// When the executor began invoking the work function.
    pub started_at: Option<DateTime<Utc>>,
    /// When the record entered a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Success payload, only with `Completed`.
    pub result: Option<serde_json::Value>,
    /// Failure description, only with `Failed`.
    pub error: Option<String>,
    /// Latest progress snapshot pushed by the work function.
    pub progress: Option<serde_json::Value>,
}

impl TaskRecord {
    /// Create a new pending record.
    pub fn new(
        owner_id: impl Into<String>,
        task_type: TaskType,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            correlation_id,
            task_type,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            progress: None,
        }
    }

    /// Transition to a new status, stamping timestamps on the way.
    pub fn transition_to(&mut self, new_status: TaskStatus) -> Result<(), TaskError> {
        if !self.status.can_transition_to(new_status) {
            return Err(TaskError::InvalidTransition {
                id: self.task_id,
                state: self.status,
                target: new_status,
            });
        }

        self.status = new_status;

        match new_status {
            TaskStatus::Running => self.started_at = Some(Utc::now()),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                self.completed_at = Some(Utc::now());
            }
            TaskStatus::Pending => {}
        }

        Ok(())
    }

    /// Apply a run outcome: terminal transition plus its payload.
    pub fn finish(&mut self, outcome: TaskOutcome) -> Result<(), TaskError> {
        self.transition_to(outcome.status())?;
        match outcome {
            TaskOutcome::Success(value) => self.result = Some(value),
            TaskOutcome::Failure(message) => self.error = Some(message),
            TaskOutcome::Cancelled => {}
        }
        Ok(())
    }

    /// Whether the record reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Run duration so far (or total, once terminal).
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            let end = self.completed_at.unwrap_or_else(Utc::now);
            end.signed_duration_since(start)
                .to_std()
                .unwrap_or_default()
        })
    }

    /// Whether this terminal record finished more than `max_age` before `now`.
    /// Non-terminal records are never expired.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        if !self.is_terminal() {
            return false;
        }
        let Some(completed_at) = self.completed_at else {
            return false;
        };
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return false;
        };
        now.signed_duration_since(completed_at) > max_age
    }
}
