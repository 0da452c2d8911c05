//! Public scheduler facade and lifecycle
//!
//! [`JobScheduler`] owns the shared state, the resource gate, and the
//! worker semaphore, and exposes the submission, query, and control
//! surface. The dispatch loop runs on its own task between `start()` and
//! `stop()`; submissions are accepted at any time and simply wait in the
//! queue while the loop is not running.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::job_queue::{JobQueue, SchedulerStats};
use super::resource_gate::{ResourceGate, ResourceProbe, SystemProbe};
use super::runner::JobRunner;
use super::types::{JobRecord, JobRequest, JobSnapshot, JobStatus};
use crate::config::SchedulerConfig;
use crate::errors::SchedulerError;
use crate::utils::SystemManager;

/// Priority job scheduler with resource-aware admission control
pub struct JobScheduler {
    queue: Arc<RwLock<JobQueue>>,
    gate: Arc<ResourceGate>,
    workers: Arc<Semaphore>,
    config: SchedulerConfig,
    lifecycle: Mutex<Option<RunnerHandle>>,
    // Keeps the background host refresh alive for the probe.
    _system_manager: Option<SystemManager>,
}

struct RunnerHandle {
    cancellation_token: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl JobScheduler {
    /// Create a scheduler probing the local host.
    ///
    /// Must be called within a Tokio runtime: the shared host monitor
    /// starts refreshing immediately.
    pub fn new(config: SchedulerConfig) -> Self {
        let manager = SystemManager::new(config.probe_refresh_interval);
        let probe: Arc<dyn ResourceProbe> = Arc::new(SystemProbe::new(manager.system()));
        Self::build(config, probe, Some(manager))
    }

    /// Create a scheduler with a custom resource probe, for environments
    /// where host-wide readings are wrong (cgroup-limited containers) or
    /// for tests.
    pub fn with_probe(config: SchedulerConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        Self::build(config, probe, None)
    }

    fn build(
        config: SchedulerConfig,
        probe: Arc<dyn ResourceProbe>,
        system_manager: Option<SystemManager>,
    ) -> Self {
        Self {
            queue: Arc::new(RwLock::new(JobQueue::default())),
            gate: Arc::new(ResourceGate::new(probe, &config)),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            config,
            lifecycle: Mutex::new(None),
            _system_manager: system_manager,
        }
    }

    /// Submit a job. Returns its id, or an error when the id is empty or
    /// already taken by a job that has not finished. Resubmitting an id
    /// whose previous run reached a terminal state replaces that record.
    pub async fn schedule_job(&self, request: JobRequest) -> Result<String, SchedulerError> {
        if request.id.trim().is_empty() {
            return Err(SchedulerError::invalid_job("job id must not be empty"));
        }

        let mut queue = self.queue.write().await;
        if let Some(existing) = queue.get(&request.id)
            && !existing.status.is_terminal()
        {
            return Err(SchedulerError::DuplicateJob { id: request.id });
        }

        let id = request.id.clone();
        let priority = request.priority;
        queue.insert_job(JobRecord::from_request(request, Utc::now()));

        info!("Scheduled job '{id}' (priority: {priority:?})");
        Ok(id)
    }

    /// Cancel a job that has not started. Returns false for unknown,
    /// running, and already-finished jobs; in-flight work is never
    /// interrupted.
    pub async fn cancel_job(&self, job_id: &str) -> bool {
        let cancelled = self.queue.write().await.cancel(job_id);
        if cancelled {
            info!("Cancelled job '{job_id}'");
        } else {
            debug!("Job '{job_id}' could not be cancelled");
        }
        cancelled
    }

    /// Point-in-time view of one job
    pub async fn get_job_status(&self, job_id: &str) -> Option<JobSnapshot> {
        self.queue.read().await.snapshot(job_id)
    }

    /// All jobs, optionally filtered by status, in submission order
    pub async fn list_jobs(&self, status: Option<JobStatus>) -> Vec<JobSnapshot> {
        self.queue.read().await.snapshots(status)
    }

    /// Counters and gauges for the whole scheduler
    pub async fn get_statistics(&self) -> SchedulerStats {
        self.queue.read().await.stats()
    }

    /// Drop finished run-once jobs from the table. Recurring jobs are
    /// kept regardless of state. Returns the number of jobs removed.
    pub async fn clear_completed(&self) -> usize {
        let removed = self.queue.write().await.purge_finished();
        info!("Cleared {removed} finished jobs");
        removed
    }

    /// Start the dispatch loop. Calling `start` on a running scheduler is
    /// a no-op.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!("Scheduler already running");
            return;
        }

        let runner = JobRunner::new(
            self.queue.clone(),
            self.gate.clone(),
            self.workers.clone(),
            self.config.clone(),
        );
        let cancellation_token = CancellationToken::new();
        let loop_token = cancellation_token.clone();
        let task = tokio::spawn(async move {
            runner.run(loop_token).await;
        });

        *lifecycle = Some(RunnerHandle {
            cancellation_token,
            task,
        });
        info!("Scheduler started");
    }

    /// Stop the dispatch loop and wait for it to wind down, including its
    /// bounded wait for in-flight jobs. Idempotent.
    pub async fn stop(&self) {
        let handle = self.lifecycle.lock().await.take();
        let Some(handle) = handle else {
            debug!("Scheduler is not running");
            return;
        };

        handle.cancellation_token.cancel();
        if let Err(e) = handle.task.await {
            warn!("Dispatch loop task ended abnormally: {e}");
        }
        info!("Scheduler stopped");
    }
}
