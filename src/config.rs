//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of blocking work functions running at once.
    pub max_blocking_tasks: usize,
    /// How long terminal tasks are kept before a sweep removes them.
    pub retention: Duration,
    /// Interval between periodic sweeps (used by the binary's reaper hook).
    pub sweep_interval: Duration,
    /// Capacity of the task event broadcast channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_blocking_tasks: 8,
            retention: Duration::from_secs(24 * 3600), // 24 hours
            sweep_interval: Duration::from_secs(3600), // 1 hour
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset.
    ///
    /// - `OFFLOAD_MAX_BLOCKING_TASKS`
    /// - `OFFLOAD_RETENTION_HOURS`
    /// - `OFFLOAD_SWEEP_INTERVAL_SECS`
    /// - `OFFLOAD_EVENT_CAPACITY`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_blocking_tasks = env_parse("OFFLOAD_MAX_BLOCKING_TASKS")?
            .unwrap_or(defaults.max_blocking_tasks);
        if max_blocking_tasks == 0 {
            return Err(ConfigError::InvalidValue {
                key: "OFFLOAD_MAX_BLOCKING_TASKS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let retention = match env_parse::<u64>("OFFLOAD_RETENTION_HOURS")? {
            Some(hours) => hours_to_duration("OFFLOAD_RETENTION_HOURS", hours)?,
            None => defaults.retention,
        };

        let sweep_interval = env_parse::<u64>("OFFLOAD_SWEEP_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let event_capacity =
            env_parse("OFFLOAD_EVENT_CAPACITY")?.unwrap_or(defaults.event_capacity);

        Ok(Self {
            max_blocking_tasks,
            retention,
            sweep_interval,
            event_capacity: event_capacity.max(1),
        })
    }
}

/// HTTP server configuration for the status API.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl ServerConfig {
    /// Build config from `OFFLOAD_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let port = env_parse("OFFLOAD_PORT")?.unwrap_or(Self::default().port);
        Ok(Self { port })
    }
}

fn hours_to_duration(key: &str, hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{hours} hours is out of range"),
        })
}

/// Parse an optional environment variable. Unset or empty is `None`.
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("{raw:?}: {e}"),
                })
        }
        _ => Ok(None),
    }
}
