//! Cross-instance run events.

use crate::error::SideEffectsError;
use autoflow_core::{FlowId, FlowRunId, ProjectId};
use autoflow_flow::{FlowRun, FlowRunStatus};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// Pub/sub channel carrying [`RunFinished`] events.
pub const FLOW_RUN_FINISHED_CHANNEL: &str = "flow-run-finished";

/// Published once a run reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFinished {
    pub run_id: FlowRunId,
    pub flow_id: FlowId,
    pub project_id: ProjectId,
    pub status: FlowRunStatus,
}

impl RunFinished {
    #[must_use]
    pub fn from_run(run: &FlowRun) -> Self {
        Self {
            run_id: run.id,
            flow_id: run.flow_id,
            project_id: run.project_id,
            status: run.status,
        }
    }

    /// Encodes the event as a pub/sub message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn to_message(&self) -> Result<String, Report<SideEffectsError>> {
        serde_json::to_string(self).map_err(|e| {
            SideEffectsError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Decodes a pub/sub message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is not a run-finished event.
    pub fn from_message(message: &str) -> Result<Self, Report<SideEffectsError>> {
        serde_json::from_str(message).map_err(|e| {
            SideEffectsError::Serialization {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_core::FlowVersionId;
    use autoflow_flow::RunEnvironment;

    #[test]
    fn message_uses_camel_case() {
        let mut run = FlowRun::new(
            FlowId::new(),
            FlowVersionId::new(),
            ProjectId::new(),
            RunEnvironment::Production,
        );
        run.finish(FlowRunStatus::Succeeded, 3);

        let message = RunFinished::from_run(&run).to_message().unwrap();
        let value: serde_json::Value = serde_json::from_str(&message).unwrap();
        assert_eq!(value["status"], "SUCCEEDED");
        assert_eq!(value["runId"], run.id.as_ulid().to_string());

        let decoded = RunFinished::from_message(&message).unwrap();
        assert_eq!(decoded.run_id, run.id);
    }
}
