//! Priority job scheduler for media processing pipelines
//!
//! This crate provides the scheduling subsystem used to run batch media
//! work (conversions, enhancements, uploads) without overwhelming the
//! host machine. Callers submit opaque async jobs; the scheduler orders
//! them by priority and due time, gates dispatch on host CPU/memory/disk
//! availability, bounds the number of concurrent workers, and handles
//! retries and interval recurrence.
//!
//! The system is built around four main components:
//! - [`scheduling::job_queue`]: job table and priority heap behind a single lock
//! - [`scheduling::resource_gate`]: two-tier admission control against host utilization
//! - the dispatch loop: pulls due, eligible jobs and hands them to workers
//! - the executor: per-job retry/recurrence wrapper
//!
//! See [`JobScheduler`] for the public surface.

pub mod config;
pub mod errors;
pub mod scheduling;
pub mod utils;

pub use config::SchedulerConfig;
pub use errors::SchedulerError;
pub use scheduling::{
    JobOutcome, JobRequest, JobScheduler, JobSnapshot, JobStatus, Priority, Recurrence,
    RecurrenceParseError, ResourceProbe, ResourceRequirements, ResourceSample, SchedulerStats,
    SystemProbe,
};
