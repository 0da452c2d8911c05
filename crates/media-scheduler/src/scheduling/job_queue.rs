//! Job table and priority queue
//!
//! All mutable scheduler state lives here: the record table, the pending
//! min-heap, the running set, and the statistic counters. The whole struct
//! sits behind one `RwLock` owned by the scheduler, so a status transition
//! and its matching heap mutation are always observed together.
//!
//! The heap stores lightweight [`QueueEntry`] keys rather than records.
//! Entries are invalidated lazily: each push stamps the record with the
//! entry's sequence number, and an entry whose sequence no longer matches
//! (or whose record left the Pending/Retrying states) is discarded when it
//! surfaces. Cancelled jobs therefore never dispatch, without paying for
//! arbitrary heap removal.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use super::types::{JobFunction, JobRecord, JobSnapshot, JobStatus, Priority, QueueEntry, delayed};

/// Scheduler-wide counters and derived gauges
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// Jobs ever submitted
    pub total_jobs: u64,
    /// Jobs that finished successfully
    pub completed: u64,
    /// Jobs that exhausted their retries
    pub failed: u64,
    /// Jobs cancelled before running
    pub cancelled: u64,
    /// Jobs currently waiting in the queue
    pub queued: usize,
    /// Jobs currently executing
    pub running: usize,
    /// Completed jobs as a percentage of submissions
    pub success_rate: f64,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct StatCounters {
    pub total_jobs: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// What became of a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailureAction {
    /// Re-enqueued; carries the attempt counter for logging
    Retrying { retries: u32, max_retries: u32 },
    /// Retries exhausted, job is terminally failed
    Failed,
}

/// Everything needed to start an execution attempt
pub(crate) struct PreparedRun {
    pub function: JobFunction,
    pub timeout: Option<Duration>,
    pub priority: Priority,
}

/// In-memory job store with priority ordering
#[derive(Debug, Default)]
pub(crate) struct JobQueue {
    jobs: HashMap<String, JobRecord>,
    pending: BinaryHeap<Reverse<QueueEntry>>,
    running: HashSet<String>,
    next_seq: u64,
    counters: StatCounters,
}

impl JobQueue {
    pub fn get(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    /// Insert a new record and enqueue it. Replaces any previous record
    /// under the same id; the caller is responsible for rejecting
    /// submissions against a live record first.
    pub fn insert_job(&mut self, record: JobRecord) {
        let id = record.id.clone();
        self.jobs.insert(id.clone(), record);
        self.counters.total_jobs += 1;
        self.enqueue(&id);
    }

    /// Push a fresh queue entry for a record, stamping it as the record's
    /// only live entry.
    fn enqueue(&mut self, id: &str) {
        self.next_seq += 1;
        let seq = self.next_seq;

        if let Some(job) = self.jobs.get_mut(id) {
            job.queue_seq = seq;
            self.pending.push(Reverse(QueueEntry {
                priority: job.priority,
                next_run: job.next_run,
                seq,
                id: job.id.clone(),
            }));
        }
    }

    /// Pop the highest-priority entry that is due, discarding stale
    /// entries along the way. Returns `None` when the queue is empty or
    /// its best candidate is not due yet (the caller must not busy-pop).
    pub fn pop_due(&mut self, now: DateTime<Utc>) -> Option<QueueEntry> {
        loop {
            let (live, due) = match self.pending.peek() {
                None => return None,
                Some(Reverse(entry)) => {
                    let live = self
                        .jobs
                        .get(&entry.id)
                        .is_some_and(|job| job.status.is_queued() && job.queue_seq == entry.seq);
                    (live, entry.next_run <= now)
                }
            };

            if !live {
                if let Some(Reverse(entry)) = self.pending.pop() {
                    debug!("Discarding stale queue entry for job '{}'", entry.id);
                }
                continue;
            }
            if !due {
                return None;
            }
            if let Some(Reverse(entry)) = self.pending.pop() {
                return Some(entry);
            }
        }
    }

    /// Push a popped job back with its due time moved forward, used when
    /// its resource requirements are momentarily unmet.
    pub fn defer(&mut self, id: &str, until: DateTime<Utc>) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.next_run = until;
        }
        self.enqueue(id);
    }

    /// Transition a popped job to Running and hand back what the executor
    /// needs. Returns `None` if the record vanished in the meantime.
    pub fn begin_run(&mut self, id: &str, now: DateTime<Utc>) -> Option<PreparedRun> {
        let job = self.jobs.get_mut(id)?;
        job.status = JobStatus::Running;
        job.started_at = Some(now);
        let prepared = PreparedRun {
            function: job.function.clone(),
            timeout: job.timeout,
            priority: job.priority,
        };
        self.running.insert(id.to_string());
        Some(prepared)
    }

    /// Remove a job from the running set once its attempt finished.
    pub fn finish_run(&mut self, id: &str) {
        if !self.running.remove(id) {
            warn!("Attempted to finish unknown running job '{id}'");
        }
    }

    /// Record a successful attempt. Recurring jobs go straight back to
    /// Pending with their next due time; returns true when that happened.
    pub fn complete(&mut self, id: &str, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            warn!("Attempted to complete unknown job '{id}'");
            return false;
        };
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.result = Some(result);
        job.error = None;
        let schedule = job.schedule;
        self.counters.completed += 1;

        match schedule {
            Some(recurrence) => {
                if let Some(job) = self.jobs.get_mut(id) {
                    job.status = JobStatus::Pending;
                    job.next_run = now + recurrence.interval();
                }
                self.enqueue(id);
                true
            }
            None => false,
        }
    }

    /// Record a failed attempt, either re-enqueueing for retry or marking
    /// the job terminally failed once retries are exhausted.
    pub fn fail_attempt(&mut self, id: &str, error: String, now: DateTime<Utc>) -> FailureAction {
        let Some(job) = self.jobs.get_mut(id) else {
            warn!("Attempted to fail unknown job '{id}'");
            return FailureAction::Failed;
        };

        if job.retries < job.max_retries {
            job.retries += 1;
            job.status = JobStatus::Retrying;
            job.error = Some(error);
            job.next_run = delayed(now, job.retry_delay);
            let action = FailureAction::Retrying {
                retries: job.retries,
                max_retries: job.max_retries,
            };
            self.enqueue(id);
            action
        } else {
            job.status = JobStatus::Failed;
            job.error = Some(error);
            job.completed_at = Some(now);
            self.counters.failed += 1;
            FailureAction::Failed
        }
    }

    /// Cancel a job that has not started. Running and finished jobs are
    /// left untouched and reported as not cancellable.
    pub fn cancel(&mut self, id: &str) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        if job.status == JobStatus::Running {
            debug!("Job '{id}' is running and cannot be cancelled");
            return false;
        }
        if job.status.is_terminal() {
            return false;
        }

        job.status = JobStatus::Cancelled;
        self.counters.cancelled += 1;
        true
    }

    /// Remove finished run-once jobs from the table; recurring jobs and
    /// anything still live survive. Returns how many were removed.
    pub fn purge_finished(&mut self) -> usize {
        let before = self.jobs.len();
        self.jobs
            .retain(|_, job| !(job.status.is_terminal() && job.schedule.is_none()));
        before - self.jobs.len()
    }

    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.jobs.get(id).map(JobRecord::snapshot)
    }

    /// Snapshots of all jobs, optionally filtered by status, in
    /// submission order.
    pub fn snapshots(&self, status: Option<JobStatus>) -> Vec<JobSnapshot> {
        let mut snapshots: Vec<JobSnapshot> = self
            .jobs
            .values()
            .filter(|job| status.is_none_or(|wanted| job.status == wanted))
            .map(JobRecord::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        snapshots
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Jobs with a live claim on the queue (Pending or Retrying records).
    /// Stale heap entries are not counted.
    pub fn queued_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|job| job.status.is_queued())
            .count()
    }

    pub fn stats(&self) -> SchedulerStats {
        let success_rate = if self.counters.total_jobs > 0 {
            self.counters.completed as f64 / self.counters.total_jobs as f64 * 100.0
        } else {
            0.0
        };

        SchedulerStats {
            total_jobs: self.counters.total_jobs,
            completed: self.counters.completed,
            failed: self.counters.failed,
            cancelled: self.counters.cancelled,
            queued: self.queued_count(),
            running: self.running_count(),
            success_rate,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::types::JobRequest;

    fn record(id: &str, priority: Priority) -> JobRecord {
        let request =
            JobRequest::new(id, || async { Ok(serde_json::Value::Null) }).priority(priority);
        JobRecord::from_request(request, Utc::now())
    }

    fn record_with_schedule(id: &str, schedule: &str) -> JobRecord {
        let request = JobRequest::new(id, || async { Ok(serde_json::Value::Null) })
            .schedule(schedule.parse().unwrap());
        JobRecord::from_request(request, Utc::now())
    }

    #[test]
    fn test_pop_due_orders_by_priority() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("low", Priority::Low));
        queue.insert_job(record("critical", Priority::Critical));
        queue.insert_job(record("normal", Priority::Normal));

        let now = Utc::now();
        assert_eq!(queue.pop_due(now).unwrap().id, "critical");
        assert_eq!(queue.pop_due(now).unwrap().id, "normal");
        assert_eq!(queue.pop_due(now).unwrap().id, "low");
        assert!(queue.pop_due(now).is_none());
    }

    #[test]
    fn test_pop_due_preserves_submission_order_on_ties() {
        let mut queue = JobQueue::default();
        let now = Utc::now();
        for name in ["first", "second", "third"] {
            let mut record = record(name, Priority::Normal);
            record.next_run = now;
            queue.insert_job(record);
        }

        assert_eq!(queue.pop_due(now).unwrap().id, "first");
        assert_eq!(queue.pop_due(now).unwrap().id, "second");
        assert_eq!(queue.pop_due(now).unwrap().id, "third");
    }

    #[test]
    fn test_pop_due_never_pops_past_the_head() {
        // A not-yet-due job at the head of the queue holds dispatch until
        // its due time; the queue is peeked, not busy-popped.
        let mut queue = JobQueue::default();
        let now = Utc::now();
        let mut future = record("future", Priority::Critical);
        future.next_run = now + chrono::Duration::minutes(10);
        queue.insert_job(future);
        queue.insert_job(record("due", Priority::Low));

        assert!(queue.pop_due(now).is_none());

        let later = now + chrono::Duration::minutes(10);
        assert_eq!(queue.pop_due(later).unwrap().id, "future");
        assert_eq!(queue.pop_due(later).unwrap().id, "due");
    }

    #[test]
    fn test_cancelled_entry_is_discarded() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("doomed", Priority::Normal));

        assert!(queue.cancel("doomed"));
        assert!(queue.pop_due(Utc::now()).is_none());
        assert_eq!(queue.snapshot("doomed").unwrap().status, JobStatus::Cancelled);
    }

    #[test]
    fn test_cancel_rules() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("job", Priority::Normal));

        let entry = queue.pop_due(Utc::now()).unwrap();
        queue.begin_run(&entry.id, Utc::now()).unwrap();
        assert!(!queue.cancel("job"), "running jobs are not cancellable");

        queue.finish_run("job");
        queue.complete("job", serde_json::Value::Null, Utc::now());
        assert!(!queue.cancel("job"), "terminal jobs are not cancellable");

        assert!(!queue.cancel("missing"));
    }

    #[test]
    fn test_resubmission_invalidates_old_entry() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("job", Priority::Normal));
        assert!(queue.cancel("job"));

        // Resubmit under the same id; the cancelled record's entry is
        // still in the heap but must not produce a second dispatch.
        queue.insert_job(record("job", Priority::Normal));

        let now = Utc::now();
        assert_eq!(queue.pop_due(now).unwrap().id, "job");
        assert!(queue.pop_due(now).is_none());
    }

    #[test]
    fn test_defer_pushes_due_time_forward() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("job", Priority::Normal));

        let now = Utc::now();
        let entry = queue.pop_due(now).unwrap();
        let until = now + chrono::Duration::seconds(30);
        queue.defer(&entry.id, until);

        assert!(queue.pop_due(now).is_none());
        assert_eq!(queue.snapshot("job").unwrap().next_run, until);
        assert_eq!(queue.pop_due(until).unwrap().id, "job");
    }

    #[test]
    fn test_complete_reenqueues_recurring_job() {
        let mut queue = JobQueue::default();
        queue.insert_job(record_with_schedule("refresh", "every_1m"));

        let now = Utc::now();
        let entry = queue.pop_due(now).unwrap();
        queue.begin_run(&entry.id, now).unwrap();
        queue.finish_run("refresh");

        let recurring = queue.complete("refresh", serde_json::json!({"ok": true}), now);
        assert!(recurring);

        let snapshot = queue.snapshot("refresh").unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.completed_at, Some(now));
        assert_eq!(snapshot.next_run, now + chrono::Duration::minutes(1));
        assert!(snapshot.next_run > entry.next_run);
        assert!(queue.get("refresh").unwrap().schedule.is_some());
    }

    #[test]
    fn test_fail_attempt_retries_then_fails() {
        let mut queue = JobQueue::default();
        let request = JobRequest::new("flaky", || async { Ok(serde_json::Value::Null) })
            .max_retries(2)
            .retry_delay(Duration::ZERO);
        queue.insert_job(JobRecord::from_request(request, Utc::now()));

        let now = Utc::now();
        assert_eq!(
            queue.fail_attempt("flaky", "boom".into(), now),
            FailureAction::Retrying {
                retries: 1,
                max_retries: 2
            }
        );
        assert_eq!(
            queue.fail_attempt("flaky", "boom".into(), now),
            FailureAction::Retrying {
                retries: 2,
                max_retries: 2
            }
        );
        assert_eq!(
            queue.fail_attempt("flaky", "boom".into(), now),
            FailureAction::Failed
        );

        let snapshot = queue.snapshot("flaky").unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_purge_finished_keeps_recurring_and_live_jobs() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("done", Priority::Normal));
        queue.insert_job(record("pending", Priority::Normal));
        queue.insert_job(record_with_schedule("recurring", "every_5m"));

        let now = Utc::now();
        queue.complete("done", serde_json::Value::Null, now);
        queue.complete("recurring", serde_json::Value::Null, now);

        assert_eq!(queue.purge_finished(), 1);
        assert!(queue.snapshot("done").is_none());
        assert!(queue.snapshot("pending").is_some());
        assert!(queue.snapshot("recurring").is_some());
    }

    #[test]
    fn test_stats_reflect_counters_and_gauges() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("a", Priority::Normal));
        queue.insert_job(record("b", Priority::Normal));
        queue.insert_job(record("c", Priority::Normal));
        queue.insert_job(record("d", Priority::Normal));

        let now = Utc::now();
        queue.complete("a", serde_json::Value::Null, now);
        queue.fail_attempt("b", "boom".into(), now);
        assert!(queue.cancel("c"));

        let stats = queue.stats();
        assert_eq!(stats.total_jobs, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.queued, 2); // "d" pending plus "b" retrying
        assert_eq!(stats.running, 0);
        assert!((stats.success_rate - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshots_filter_by_status() {
        let mut queue = JobQueue::default();
        queue.insert_job(record("a", Priority::Normal));
        queue.insert_job(record("b", Priority::Normal));
        queue.complete("a", serde_json::Value::Null, Utc::now());

        let completed = queue.snapshots(Some(JobStatus::Completed));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "a");

        assert_eq!(queue.snapshots(None).len(), 2);
    }
}
