//! Worker system: running work functions in the background.
//!
//! Core components:
//! - `work` — Work functions (async or blocking) and the `TaskHandler` trait
//! - `executor` — Per-task run routine (Running → Completed/Failed/Cancelled)
//! - `dispatch` — Inline (caller's runtime) vs isolated (own thread + runtime)
//! - `reaper` — Eviction of old finished records

pub mod dispatch;
pub mod executor;
pub mod reaper;
pub mod work;

pub use dispatch::{Dispatch, DispatchMode, InlineDispatch, IsolatedDispatch};
pub use executor::Executor;
pub use reaper::{Reaper, spawn_reaper_task};
pub use work::{TaskHandler, Work, WorkResult};
