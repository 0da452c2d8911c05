//! Error handling for the scheduler
//!
//! Submission-time problems surface as typed [`SchedulerError`] values.
//! Job-body failures are deliberately *not* part of this hierarchy: they
//! are opaque `anyhow::Error`s caught by the executor and recorded on the
//! job itself, retrievable through the query surface.

pub mod types;

pub use types::SchedulerError;
