//! Scheduler configuration
//!
//! [`SchedulerConfig`] is a plain serde-deserializable struct; reading it
//! from a file or the environment is the embedding application's concern.
//! Durations accept either plain seconds or human-readable strings
//! (`"500ms"`, `"2m"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod duration_serde;

use defaults::*;

/// Tuning knobs for the job scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of jobs running at the same time
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Host-wide CPU ceiling; while usage is above it no job is dispatched
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f32,

    /// Host-wide memory ceiling; while usage is above it no job is dispatched
    #[serde(default = "default_max_memory_percent")]
    pub max_memory_percent: f32,

    /// Cadence of the dispatch loop
    #[serde(default = "default_dispatch_interval", with = "duration_serde::duration")]
    pub dispatch_interval: Duration,

    /// How far a job is pushed back when its own resource requirements are unmet
    #[serde(
        default = "default_resource_defer_delay",
        with = "duration_serde::duration"
    )]
    pub resource_defer_delay: Duration,

    /// Refresh cadence of the shared host monitor
    #[serde(
        default = "default_probe_refresh_interval",
        with = "duration_serde::duration"
    )]
    pub probe_refresh_interval: Duration,

    /// How long `stop()` waits for in-flight jobs before giving up
    #[serde(default = "default_shutdown_grace", with = "duration_serde::duration")]
    pub shutdown_grace: Duration,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}
fn default_max_cpu_percent() -> f32 {
    DEFAULT_MAX_CPU_PERCENT
}
fn default_max_memory_percent() -> f32 {
    DEFAULT_MAX_MEMORY_PERCENT
}
fn default_dispatch_interval() -> Duration {
    DEFAULT_DISPATCH_INTERVAL
}
fn default_resource_defer_delay() -> Duration {
    DEFAULT_RESOURCE_DEFER_DELAY
}
fn default_probe_refresh_interval() -> Duration {
    DEFAULT_PROBE_REFRESH_INTERVAL
}
fn default_shutdown_grace() -> Duration {
    DEFAULT_SHUTDOWN_GRACE
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            max_cpu_percent: default_max_cpu_percent(),
            max_memory_percent: default_max_memory_percent(),
            dispatch_interval: default_dispatch_interval(),
            resource_defer_delay: default_resource_defer_delay(),
            probe_refresh_interval: default_probe_refresh_interval(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_yields_defaults() {
        let config: SchedulerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.max_cpu_percent, DEFAULT_MAX_CPU_PERCENT);
        assert_eq!(config.dispatch_interval, DEFAULT_DISPATCH_INTERVAL);
        assert_eq!(config.resource_defer_delay, DEFAULT_RESOURCE_DEFER_DELAY);
    }

    #[test]
    fn test_human_readable_durations() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{
                "max_workers": 2,
                "dispatch_interval": "250ms",
                "resource_defer_delay": "1m"
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.dispatch_interval, Duration::from_millis(250));
        assert_eq!(config.resource_defer_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_roundtrip() {
        let config = SchedulerConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: SchedulerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_workers, config.max_workers);
        assert_eq!(back.shutdown_grace, config.shutdown_grace);
    }
}
