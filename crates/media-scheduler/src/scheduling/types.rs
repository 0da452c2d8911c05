//! Job scheduling type definitions

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::recurrence::Recurrence;
use crate::errors::SchedulerError;

/// Result of one execution attempt of a job body.
///
/// The payload must be serializable so it can be returned through the
/// query surface; failures carry whatever error the body produced.
pub type JobOutcome = Result<serde_json::Value, anyhow::Error>;

/// The opaque unit of work. Arguments are captured by the closure.
pub type JobFunction = Arc<dyn Fn() -> BoxFuture<'static, JobOutcome> + Send + Sync>;

/// Priority levels for job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// Recovery work and anything that must preempt the backlog
    Critical = 0,
    /// Manual user triggers
    High = 1,
    /// Regular batch work
    Normal = 2,
    /// Background housekeeping
    Low = 3,
}

impl Priority {
    /// Numeric rank; lower ranks dispatch first
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue for its due time
    Pending,
    /// Currently executing on a worker
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted its retries
    Failed,
    /// Cancelled before it ran
    Cancelled,
    /// Failed and waiting for its retry delay to elapse
    Retrying,
}

impl JobStatus {
    /// Terminal states permit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// States in which the job may hold a live queue entry
    pub(crate) fn is_queued(self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

/// Minimum free resources a job needs before it is dispatched.
///
/// All fields are optional; an empty requirement set always passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Minimum idle CPU, in percent of total capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cpu_free_percent: Option<f32>,
    /// Minimum available memory, in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory_free_gb: Option<f64>,
    /// Minimum free disk space, in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_disk_free_gb: Option<f64>,
}

impl ResourceRequirements {
    /// True when no minimum is set
    pub fn is_empty(&self) -> bool {
        self.min_cpu_free_percent.is_none()
            && self.min_memory_free_gb.is_none()
            && self.min_disk_free_gb.is_none()
    }
}

/// A job submission, built with the fluent methods and handed to
/// [`JobScheduler::schedule_job`](super::JobScheduler::schedule_job).
#[derive(Clone)]
pub struct JobRequest {
    pub(crate) id: String,
    pub(crate) function: JobFunction,
    pub(crate) priority: Priority,
    pub(crate) schedule: Option<Recurrence>,
    pub(crate) max_retries: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) timeout: Option<Duration>,
    pub(crate) resource_requirements: ResourceRequirements,
}

impl JobRequest {
    /// Create a request for a run-once job with default settings
    /// (normal priority, 3 retries, 60s retry delay, no timeout).
    pub fn new<F, Fut>(id: impl Into<String>, function: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        Self {
            id: id.into(),
            function: Arc::new(move || function().boxed()),
            priority: Priority::Normal,
            schedule: None,
            max_retries: 3,
            retry_delay: Duration::from_secs(60),
            timeout: None,
            resource_requirements: ResourceRequirements::default(),
        }
    }

    /// Set the dispatch priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Make the job recurring; it re-enqueues after every successful run
    pub fn schedule(mut self, recurrence: Recurrence) -> Self {
        self.schedule = Some(recurrence);
        self
    }

    /// Parse and set a recurrence expression such as `"every_5m"`.
    /// Malformed expressions are rejected here, at submission time.
    pub fn schedule_expression(self, expression: &str) -> Result<Self, SchedulerError> {
        let recurrence = expression.parse::<Recurrence>()?;
        Ok(self.schedule(recurrence))
    }

    /// Maximum number of retries after a failed attempt
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay between a failed attempt and its retry
    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Abort an attempt that runs longer than this; counts as a failure
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Minimum free host resources required before dispatch
    pub fn resources(mut self, requirements: ResourceRequirements) -> Self {
        self.resource_requirements = requirements;
        self
    }
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("schedule", &self.schedule)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Full execution state of one job, owned by the job table
pub(crate) struct JobRecord {
    pub id: String,
    pub function: JobFunction,
    pub priority: Priority,
    pub schedule: Option<Recurrence>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
    pub resource_requirements: ResourceRequirements,

    pub status: JobStatus,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,

    /// Sequence of this record's live queue entry; entries carrying any
    /// other value are stale and discarded on pop.
    pub queue_seq: u64,
}

impl JobRecord {
    pub fn from_request(request: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: request.id,
            function: request.function,
            priority: request.priority,
            schedule: request.schedule,
            max_retries: request.max_retries,
            retry_delay: request.retry_delay,
            timeout: request.timeout,
            resource_requirements: request.resource_requirements,
            status: JobStatus::Pending,
            retries: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            next_run: now,
            result: None,
            error: None,
            queue_seq: 0,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            priority: self.priority,
            schedule: self.schedule,
            retries: self.retries,
            max_retries: self.max_retries,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            next_run: self.next_run,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("status", &self.status)
            .field("retries", &self.retries)
            .field("next_run", &self.next_run)
            .finish_non_exhaustive()
    }
}

/// Serializable point-in-time view of a job, returned by the query surface
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Recurrence>,
    pub retries: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Heap key for pending jobs.
///
/// Ordered by priority rank, then due time, then submission sequence, so
/// ties between equal-priority jobs due at the same instant resolve in
/// submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueEntry {
    pub priority: Priority,
    pub next_run: DateTime<Utc>,
    pub seq: u64,
    pub id: String,
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.next_run.cmp(&other.next_run))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Shift a timestamp forward by a wall-clock delay
pub(crate) fn delayed(from: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    from + chrono::Duration::from_std(by).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(priority: Priority, next_run: DateTime<Utc>, seq: u64) -> QueueEntry {
        QueueEntry {
            priority,
            next_run,
            seq,
            id: format!("job-{seq}"),
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Normal);
        assert!(Priority::Normal < Priority::Low);
        assert_eq!(Priority::Critical.rank(), 0);
        assert_eq!(Priority::Low.rank(), 3);
    }

    #[test]
    fn test_queue_entry_priority_beats_time() {
        let now = Utc::now();
        let critical_later = entry(Priority::Critical, now + chrono::Duration::hours(1), 2);
        let low_now = entry(Priority::Low, now, 1);

        assert!(critical_later < low_now);
    }

    #[test]
    fn test_queue_entry_time_breaks_priority_tie() {
        let now = Utc::now();
        let earlier = entry(Priority::Normal, now, 2);
        let later = entry(Priority::Normal, now + chrono::Duration::minutes(10), 1);

        assert!(earlier < later);
    }

    #[test]
    fn test_queue_entry_sequence_breaks_full_tie() {
        let now = Utc::now();
        let first = entry(Priority::Normal, now, 1);
        let second = entry(Priority::Normal, now, 2);

        assert!(first < second);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Retrying.is_terminal());
    }

    #[test]
    fn test_queued_states() {
        assert!(JobStatus::Pending.is_queued());
        assert!(JobStatus::Retrying.is_queued());
        assert!(!JobStatus::Running.is_queued());
        assert!(!JobStatus::Cancelled.is_queued());
    }

    #[test]
    fn test_request_defaults() {
        let request = JobRequest::new("encode", || async { Ok(serde_json::Value::Null) });
        assert_eq!(request.priority, Priority::Normal);
        assert_eq!(request.max_retries, 3);
        assert_eq!(request.retry_delay, Duration::from_secs(60));
        assert!(request.timeout.is_none());
        assert!(request.schedule.is_none());
        assert!(request.resource_requirements.is_empty());
    }

    #[test]
    fn test_schedule_expression_parses_at_submission() {
        let request = JobRequest::new("nightly", || async { Ok(serde_json::Value::Null) })
            .schedule_expression("daily")
            .unwrap();
        assert!(request.schedule.is_some());

        let malformed = JobRequest::new("nightly", || async { Ok(serde_json::Value::Null) })
            .schedule_expression("every_other_day");
        assert!(matches!(malformed, Err(SchedulerError::InvalidSchedule(_))));
    }

    #[test]
    fn test_record_snapshot_reflects_state() {
        let now = Utc::now();
        let request = JobRequest::new("encode", || async { Ok(serde_json::Value::Null) })
            .priority(Priority::High);
        let record = JobRecord::from_request(request, now);

        let snapshot = record.snapshot();
        assert_eq!(snapshot.id, "encode");
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.priority, Priority::High);
        assert_eq!(snapshot.created_at, now);
        assert_eq!(snapshot.next_run, now);
        assert!(snapshot.result.is_none());
    }
}
