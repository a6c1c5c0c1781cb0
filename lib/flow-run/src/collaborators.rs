//! Services notified when a run changes state.

use crate::error::SideEffectsError;
use async_trait::async_trait;
use autoflow_core::ProjectId;
use autoflow_flow::FlowRun;
use rootcause::prelude::Report;

/// Usage accounting run when a flow run finishes.
#[async_trait]
pub trait FlowRunHooks: Send + Sync {
    /// Records the tasks a finished run consumed.
    async fn on_finish(
        &self,
        project_id: ProjectId,
        tasks: Option<u32>,
    ) -> Result<(), Report<SideEffectsError>>;
}

/// Tracks failing production flows.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Records an issue for a failed run.
    async fn record(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>>;
}

/// Tells waiting parties that a run finished.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn notify(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>>;
}
