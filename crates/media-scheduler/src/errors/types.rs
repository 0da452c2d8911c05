//! Error type definitions for the scheduler

use thiserror::Error;

use crate::scheduling::recurrence::RecurrenceParseError;

/// Errors returned by the submission and control surface
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this id already exists and has not reached a terminal state
    #[error("job '{id}' already exists and is not finished")]
    DuplicateJob { id: String },

    /// The job request itself is malformed
    #[error("invalid job: {reason}")]
    InvalidJob { reason: String },

    /// The recurrence expression could not be parsed
    #[error("invalid schedule: {0}")]
    InvalidSchedule(#[from] RecurrenceParseError),
}

impl SchedulerError {
    /// Create an invalid-job error with a custom message
    pub fn invalid_job<S: Into<String>>(reason: S) -> Self {
        Self::InvalidJob {
            reason: reason.into(),
        }
    }
}
