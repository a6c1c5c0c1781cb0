//! Error types for flow run side effects.

use autoflow_core::FlowRunId;
use autoflow_flow::FlowRunStatus;
use std::fmt;

/// Errors from flow run side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectsError {
    /// A paused run carries no pause metadata.
    MissingPauseMetadata { run_id: FlowRunId },
    /// `finish` was called for a run that has not finished.
    NotTerminal {
        run_id: FlowRunId,
        status: FlowRunStatus,
    },
    /// The job queue rejected the run's job.
    Enqueue { run_id: FlowRunId },
    /// The on-finish hook failed.
    Hook { reason: String },
    /// The issue could not be recorded.
    Issue { reason: String },
    /// The finish notification could not be delivered.
    Notification { reason: String },
    /// The run-finished event could not be encoded.
    Serialization { reason: String },
}

impl fmt::Display for SideEffectsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPauseMetadata { run_id } => {
                write!(f, "pause metadata is required to pause flow run {run_id}")
            }
            Self::NotTerminal { run_id, status } => {
                write!(f, "flow run {run_id} is not finished (status {status:?})")
            }
            Self::Enqueue { run_id } => write!(f, "failed to enqueue flow run {run_id}"),
            Self::Hook { reason } => write!(f, "on-finish hook failed: {reason}"),
            Self::Issue { reason } => write!(f, "failed to record issue: {reason}"),
            Self::Notification { reason } => write!(f, "failed to notify run finish: {reason}"),
            Self::Serialization { reason } => write!(f, "failed to encode event: {reason}"),
        }
    }
}

impl std::error::Error for SideEffectsError {}
