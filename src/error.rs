//! Error types for the offload engine.
//!
//! Work-function failures never surface here: they are captured into the
//! task record as a `Failed` status. These types cover configuration and
//! misuse of the record state machine.

use uuid::Uuid;

use crate::task::TaskStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Task-record errors.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task {id} not found")]
    NotFound { id: Uuid },

    #[error("Task {id} already in state {state}, cannot transition to {target}")]
    InvalidTransition {
        id: Uuid,
        state: TaskStatus,
        target: TaskStatus,
    },
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
