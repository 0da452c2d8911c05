/// Configuration default values
///
/// This module contains all the default values for configuration options,
/// making them easily changeable in one central location.
use std::time::Duration;

// Worker pool defaults
pub const DEFAULT_MAX_WORKERS: usize = 4;

// Admission control defaults
pub const DEFAULT_MAX_CPU_PERCENT: f32 = 80.0;
pub const DEFAULT_MAX_MEMORY_PERCENT: f32 = 80.0;
pub const DEFAULT_RESOURCE_DEFER_DELAY: Duration = Duration::from_secs(30);

// Loop cadence defaults
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PROBE_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

// Shutdown defaults
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
