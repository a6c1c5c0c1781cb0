//! Error types for the queue crate.
//!
//! Errors are designed for layered context using rootcause: producers wrap
//! a `QueueError` report in their own error with `.context()`.

use std::fmt;

/// Errors from job queue operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The cron expression of a repeating job cannot be parsed.
    InvalidCronExpression { expression: String, reason: String },
    /// The timezone of a repeating job is not supported.
    InvalidTimezone { timezone: String },
    /// A repeating job's schedule never fires again.
    NoUpcomingOccurrence { expression: String },
    /// The broker could not be reached or set up.
    ConnectionFailed { reason: String },
    /// Enqueueing a job failed.
    PublishFailed { job_id: String, reason: String },
    /// Reading or writing persisted schedule state failed.
    StorageFailed { reason: String },
    /// Claiming or acknowledging a job failed.
    ConsumeFailed { reason: String },
    /// A job could not be encoded or decoded.
    Serialization { reason: String },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::InvalidTimezone { timezone } => write!(f, "unsupported timezone: {timezone}"),
            Self::NoUpcomingOccurrence { expression } => {
                write!(f, "cron expression '{expression}' has no upcoming occurrence")
            }
            Self::ConnectionFailed { reason } => write!(f, "queue connection failed: {reason}"),
            Self::PublishFailed { job_id, reason } => {
                write!(f, "failed to enqueue job {job_id}: {reason}")
            }
            Self::StorageFailed { reason } => write!(f, "queue storage failed: {reason}"),
            Self::ConsumeFailed { reason } => write!(f, "failed to consume job: {reason}"),
            Self::Serialization { reason } => write!(f, "job serialization failed: {reason}"),
        }
    }
}

impl std::error::Error for QueueError {}
