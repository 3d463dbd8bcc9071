//! Offload: an in-process background task engine.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod task;
pub mod worker;

pub use engine::TaskEngine;
