//! Centralized host monitoring manager
//!
//! Keeps a single shared `sysinfo::System` fresh in the background so the
//! resource gate never pays the sampling cost on the dispatch path.
//! CPU usage numbers are deltas between refreshes, so the refresh
//! interval also bounds how stale a reading can be.

use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::RwLock;
use tokio::time::{self, MissedTickBehavior};

/// Shared host monitor with periodic refresh
pub struct SystemManager {
    system: Arc<RwLock<System>>,
    refresh_task: tokio::task::JoinHandle<()>,
}

impl SystemManager {
    /// Create a new system manager refreshing at the given interval.
    ///
    /// Must be called within a Tokio runtime; the refresh task is spawned
    /// immediately and aborted when the manager is dropped.
    pub fn new(refresh_interval: Duration) -> Self {
        let system = Arc::new(RwLock::new(System::new_all()));
        let refresh_task = Self::start_refresh_task(system.clone(), refresh_interval);

        Self {
            system,
            refresh_task,
        }
    }

    /// Get the shared system instance
    pub fn system(&self) -> Arc<RwLock<System>> {
        self.system.clone()
    }

    fn start_refresh_task(
        system: Arc<RwLock<System>>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let mut sys = system.write().await;
                sys.refresh_cpu_usage();
                sys.refresh_memory();
                tracing::trace!("host monitoring refreshed");
            }
        })
    }
}

impl Drop for SystemManager {
    fn drop(&mut self) {
        self.refresh_task.abort();
    }
}
