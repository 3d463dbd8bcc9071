//! Task records and their store.
//!
//! - `state` — Task record and status machine (Pending → Running → Completed/Failed/Cancelled)
//! - `kind` — Task types and long-running tool routing
//! - `registry` — In-memory, mutex-guarded record store with change events
//! - `progress` — Handle work functions use to publish progress

pub mod kind;
pub mod progress;
pub mod registry;
pub mod state;

pub use kind::{TaskType, launch_message, runs_in_background};
pub use progress::ProgressReporter;
pub use registry::{RegistrySummary, TaskEvent, TaskRegistry};
pub use state::{TaskOutcome, TaskRecord, TaskStatus};
