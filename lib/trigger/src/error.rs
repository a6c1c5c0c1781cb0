//! Error types for the trigger crate.
//!
//! Errors are designed for layered context using rootcause:
//! - queue failures are wrapped as [`TriggerError::Scheduling`]
//! - collaborator failures are reported with their own variant

use autoflow_core::{FlowVersionId, ProjectId};
use std::fmt;

/// Errors from trigger activation and deactivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// The piece or its trigger is unknown.
    PieceTriggerNotFound {
        piece_name: String,
        trigger_name: String,
    },
    /// The webhook URL could not be resolved.
    WebhookUrl { reason: String },
    /// The engine could not be reached.
    Engine { reason: String },
    /// An app event listener could not be registered or removed.
    Listener { reason: String },
    /// The project's plan could not be read.
    PlanLookup { project_id: ProjectId },
    /// The job queue rejected a schedule change.
    Scheduling { flow_version_id: FlowVersionId },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PieceTriggerNotFound {
                piece_name,
                trigger_name,
            } => write!(f, "trigger {trigger_name} not found in piece {piece_name}"),
            Self::WebhookUrl { reason } => write!(f, "failed to resolve webhook url: {reason}"),
            Self::Engine { reason } => write!(f, "trigger engine call failed: {reason}"),
            Self::Listener { reason } => write!(f, "app event listener failed: {reason}"),
            Self::PlanLookup { project_id } => {
                write!(f, "failed to load plan for project {project_id}")
            }
            Self::Scheduling { flow_version_id } => {
                write!(f, "failed to schedule trigger for flow version {flow_version_id}")
            }
        }
    }
}

impl std::error::Error for TriggerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_piece_and_trigger() {
        let err = TriggerError::PieceTriggerNotFound {
            piece_name: "@autoflow/piece-gmail".to_string(),
            trigger_name: "new_email".to_string(),
        };
        assert!(err.to_string().contains("new_email"));
        assert!(err.to_string().contains("@autoflow/piece-gmail"));
    }

    #[test]
    fn scheduling_names_flow_version() {
        let id = FlowVersionId::new();
        let err = TriggerError::Scheduling { flow_version_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
