//! Work functions: the opaque callables the engine runs.
//!
//! A work function either cooperates with the scheduler (`Work::Async`) or
//! blocks its thread (`Work::Blocking`). Arguments are captured by the
//! closure; the only thing the engine passes in is a [`ProgressReporter`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::task::ProgressReporter;

/// What a work function produces: a structured value or an opaque error.
pub type WorkResult = anyhow::Result<serde_json::Value>;

type AsyncWorkFn = Box<dyn FnOnce(ProgressReporter) -> BoxFuture<'static, WorkResult> + Send>;
type BlockingWorkFn = Box<dyn FnOnce(ProgressReporter) -> WorkResult + Send>;

/// A long-running operation handed to the engine.
pub enum Work {
    /// Awaited directly on whichever scheduler drives the run.
    Async(AsyncWorkFn),
    /// Offloaded to the bounded blocking pool.
    Blocking(BlockingWorkFn),
}

impl Work {
    /// Wrap an async work function.
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = WorkResult> + Send + 'static,
    {
        Self::Async(Box::new(move |progress| Box::pin(f(progress))))
    }

    /// Wrap a plain blocking work function.
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce(ProgressReporter) -> WorkResult + Send + 'static,
    {
        Self::Blocking(Box::new(f))
    }

    /// Wrap a shared [`TaskHandler`].
    pub fn handler(handler: Arc<dyn TaskHandler>) -> Self {
        Self::future(move |progress| async move { handler.run(progress).await })
    }

    /// Whether this work must go to the blocking pool.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Blocking(_))
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async(_) => f.write_str("Work::Async"),
            Self::Blocking(_) => f.write_str("Work::Blocking"),
        }
    }
}

/// Reusable async work, for collaborators that prefer a trait object to a
/// closure.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Run the work, optionally publishing progress.
    async fn run(&self, progress: ProgressReporter) -> WorkResult;
}
