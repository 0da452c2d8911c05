//! Per-job execution wrapper
//!
//! One task per in-flight job, holding its worker permit for the whole
//! attempt. The wrapper owns the Running transition, the optional attempt
//! timeout, and the success/retry/recurrence bookkeeping; the job body
//! itself stays opaque. Body failures never escape this task.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{OwnedSemaphorePermit, RwLock};
use tracing::{error, info, warn};

use super::job_queue::{FailureAction, JobQueue};

/// Spawn a worker task for a popped job. The permit rides along and is
/// released when the task finishes, reopening the worker slot.
pub(crate) fn spawn_job(
    queue: Arc<RwLock<JobQueue>>,
    job_id: String,
    permit: OwnedSemaphorePermit,
) {
    tokio::spawn(async move {
        let _permit = permit;
        run_job(queue, &job_id).await;
    });
}

async fn run_job(queue: Arc<RwLock<JobQueue>>, job_id: &str) {
    let started = std::time::Instant::now();

    let prepared = {
        let mut queue = queue.write().await;
        queue.begin_run(job_id, Utc::now())
    };
    let Some(prepared) = prepared else {
        warn!("Job '{job_id}' disappeared before execution");
        return;
    };

    info!(
        "Starting execution of job '{job_id}' (priority: {:?})",
        prepared.priority
    );

    let outcome = match prepared.timeout {
        Some(limit) => match tokio::time::timeout(limit, (prepared.function)()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("job timed out after {limit:?}")),
        },
        None => (prepared.function)().await,
    };

    let elapsed = started.elapsed();
    let now = Utc::now();
    let mut queue = queue.write().await;
    queue.finish_run(job_id);

    match outcome {
        Ok(result) => {
            let recurring = queue.complete(job_id, result, now);
            if recurring {
                info!("Job '{job_id}' completed successfully in {elapsed:?}, re-enqueued");
            } else {
                info!("Job '{job_id}' completed successfully in {elapsed:?}");
            }
        }
        Err(e) => match queue.fail_attempt(job_id, format!("{e:#}"), now) {
            FailureAction::Retrying {
                retries,
                max_retries,
            } => {
                warn!(
                    "Job '{job_id}' failed after {elapsed:?}, retrying ({retries}/{max_retries}): {e:#}"
                );
            }
            FailureAction::Failed => {
                error!("Job '{job_id}' failed permanently after {elapsed:?}: {e:#}");
            }
        },
    }
}
