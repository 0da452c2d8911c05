//! Two-tier admission control against host resource availability
//!
//! Tier one is host-wide: while CPU or memory usage sits above the
//! configured ceilings, no job at all is dispatched (global backpressure).
//! Tier two is per-job: a popped job's own minimum-free requirements are
//! checked against the same sample, and an unmet job is pushed back with a
//! delay instead of being dropped, so momentarily-starved jobs still run
//! eventually.
//!
//! Sampling goes through the [`ResourceProbe`] trait; production code uses
//! [`SystemProbe`] over the shared host monitor, embedders in unusual
//! environments (containers with cgroup limits, test harnesses) can
//! substitute their own.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::{Disks, System};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::types::ResourceRequirements;
use crate::config::SchedulerConfig;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// One observation of host utilization and availability
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Host-wide CPU usage, percent
    pub cpu_percent: f32,
    /// Host-wide memory usage, percent
    pub memory_percent: f32,
    /// Memory available to new work, in GB
    pub available_memory_gb: f64,
    /// Free space on the root volume, in GB
    pub free_disk_gb: f64,
}

/// Source of host utilization samples
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Take one observation of the host
    async fn sample(&self) -> ResourceSample;
}

/// Production probe reading the shared `sysinfo::System`
pub struct SystemProbe {
    system: Arc<RwLock<System>>,
}

impl SystemProbe {
    /// Create a probe over a shared system handle, typically from
    /// [`SystemManager`](crate::utils::SystemManager).
    pub fn new(system: Arc<RwLock<System>>) -> Self {
        Self { system }
    }
}

#[async_trait]
impl ResourceProbe for SystemProbe {
    async fn sample(&self) -> ResourceSample {
        let (cpu_percent, memory_percent, available_memory_gb) = {
            let sys = self.system.read().await;
            let total = sys.total_memory() as f64;
            let used = sys.used_memory() as f64;
            let memory_percent = if total > 0.0 {
                (used / total * 100.0) as f32
            } else {
                0.0
            };
            (
                sys.global_cpu_usage(),
                memory_percent,
                sys.available_memory() as f64 / BYTES_PER_GB,
            )
        };

        ResourceSample {
            cpu_percent,
            memory_percent,
            available_memory_gb,
            free_disk_gb: root_disk_free_gb(),
        }
    }
}

/// Free space on the root mount, falling back to the roomiest disk on
/// platforms without a "/" mount point.
fn root_disk_free_gb() -> f64 {
    let disks = Disks::new_with_refreshed_list();
    let list = disks.list();
    list.iter()
        .find(|disk| disk.mount_point() == Path::new("/"))
        .or_else(|| list.iter().max_by_key(|disk| disk.available_space()))
        .map(|disk| disk.available_space() as f64 / BYTES_PER_GB)
        .unwrap_or(0.0)
}

/// Admission checks evaluated by the dispatch loop
pub(crate) struct ResourceGate {
    probe: Arc<dyn ResourceProbe>,
    max_cpu_percent: f32,
    max_memory_percent: f32,
}

impl ResourceGate {
    pub fn new(probe: Arc<dyn ResourceProbe>, config: &SchedulerConfig) -> Self {
        Self {
            probe,
            max_cpu_percent: config.max_cpu_percent,
            max_memory_percent: config.max_memory_percent,
        }
    }

    pub async fn sample(&self) -> ResourceSample {
        self.probe.sample().await
    }

    /// Host-wide check; a failure defers the entire dispatch cycle.
    pub fn system_available(&self, sample: &ResourceSample) -> bool {
        if sample.cpu_percent > self.max_cpu_percent {
            warn!(
                "High CPU usage: {:.1}% (ceiling {:.1}%)",
                sample.cpu_percent, self.max_cpu_percent
            );
            return false;
        }

        if sample.memory_percent > self.max_memory_percent {
            warn!(
                "High memory usage: {:.1}% (ceiling {:.1}%)",
                sample.memory_percent, self.max_memory_percent
            );
            return false;
        }

        true
    }

    /// Per-job check against the job's own minimum-free requirements.
    pub fn requirements_met(
        &self,
        requirements: &ResourceRequirements,
        sample: &ResourceSample,
    ) -> bool {
        if requirements.is_empty() {
            return true;
        }

        if let Some(min_cpu_free) = requirements.min_cpu_free_percent {
            let cpu_free = 100.0 - sample.cpu_percent;
            if cpu_free < min_cpu_free {
                debug!("CPU free {cpu_free:.1}% below required {min_cpu_free:.1}%");
                return false;
            }
        }

        if let Some(min_memory_free) = requirements.min_memory_free_gb {
            if sample.available_memory_gb < min_memory_free {
                debug!(
                    "Available memory {:.2}GB below required {min_memory_free:.2}GB",
                    sample.available_memory_gb
                );
                return false;
            }
        }

        if let Some(min_disk_free) = requirements.min_disk_free_gb {
            if sample.free_disk_gb < min_disk_free {
                debug!(
                    "Free disk {:.2}GB below required {min_disk_free:.2}GB",
                    sample.free_disk_gb
                );
                return false;
            }
        }

        true
    }
}
