//! Dispatch loop
//!
//! The single coordinating loop of the scheduler. Every tick it takes one
//! host sample, applies the global resource gate, and then drains as many
//! due jobs as worker permits allow, deferring any whose own resource
//! requirements are unmet. Faults inside a tick are logged and never
//! terminate the loop.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor;
use super::job_queue::JobQueue;
use super::resource_gate::ResourceGate;
use super::types::delayed;
use crate::config::SchedulerConfig;

/// Owner of the dispatch loop; lives on its own task for the lifetime of
/// the scheduler.
pub(crate) struct JobRunner {
    queue: Arc<RwLock<JobQueue>>,
    gate: Arc<ResourceGate>,
    workers: Arc<Semaphore>,
    config: SchedulerConfig,
}

impl JobRunner {
    pub fn new(
        queue: Arc<RwLock<JobQueue>>,
        gate: Arc<ResourceGate>,
        workers: Arc<Semaphore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queue,
            gate,
            workers,
            config,
        }
    }

    /// Run until the cancellation token fires, then wait (bounded) for
    /// in-flight jobs before returning.
    pub async fn run(&self, cancellation_token: CancellationToken) {
        info!(
            "Starting job dispatch loop (max workers: {})",
            self.config.max_workers
        );
        let mut dispatch_tick = interval(self.config.dispatch_interval);
        dispatch_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = dispatch_tick.tick() => {
                    if let Err(e) = self.dispatch_ready_jobs().await {
                        error!("Error dispatching ready jobs: {e:#}");
                    }
                }
                _ = cancellation_token.cancelled() => {
                    info!("Job dispatch loop received cancellation signal");
                    self.wait_for_running_jobs().await;
                    break;
                }
            }
        }

        info!("Job dispatch loop stopped");
    }

    /// One dispatch cycle: gate globally, then hand out due jobs while
    /// worker permits last.
    async fn dispatch_ready_jobs(&self) -> Result<()> {
        let sample = self.gate.sample().await;
        if !self.gate.system_available(&sample) {
            debug!("Host resources over ceiling, deferring dispatch cycle");
            return Ok(());
        }

        loop {
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                debug!(
                    "At maximum concurrent jobs ({}), waiting",
                    self.config.max_workers
                );
                return Ok(());
            };

            let now = Utc::now();
            let entry = { self.queue.write().await.pop_due(now) };
            let Some(entry) = entry else {
                // Queue empty or its head not due yet.
                return Ok(());
            };

            let requirements = {
                let queue = self.queue.read().await;
                queue.get(&entry.id).map(|job| job.resource_requirements.clone())
            };
            let Some(requirements) = requirements else {
                continue;
            };

            if !self.gate.requirements_met(&requirements, &sample) {
                let until = delayed(now, self.config.resource_defer_delay);
                debug!(
                    "Deferring job '{}' until {}: resource requirements unmet",
                    entry.id,
                    until.format("%Y-%m-%d %H:%M:%S UTC")
                );
                self.queue.write().await.defer(&entry.id, until);
                continue;
            }

            executor::spawn_job(self.queue.clone(), entry.id, permit);
        }
    }

    /// Give in-flight jobs a bounded chance to finish during shutdown.
    async fn wait_for_running_jobs(&self) {
        let running = self.queue.read().await.running_count();
        if running == 0 {
            return;
        }

        info!("Waiting for {running} running jobs to complete...");
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        let mut check = interval(Duration::from_millis(200));
        check.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            check.tick().await;

            let running = self.queue.read().await.running_count();
            if running == 0 {
                info!("All running jobs completed");
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "Timeout waiting for {running} jobs to complete, proceeding with shutdown"
                );
                break;
            }
            debug!("Still waiting for {running} running jobs to complete...");
        }
    }
}
