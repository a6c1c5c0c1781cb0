//! Flow runs and their status machine.

use autoflow_core::{FlowId, FlowRunId, FlowVersionId, ProjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a run belongs to a published flow or an editor test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunEnvironment {
    /// Published flow, real side effects.
    Production,
    /// Test run from the editor.
    Testing,
}

/// Status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowRunStatus {
    /// Waiting for a worker.
    Queued,
    /// Executing.
    Running,
    /// Suspended until a delay elapses or a webhook arrives.
    Paused,
    /// Completed successfully.
    Succeeded,
    /// A step failed.
    Failed,
    /// The engine itself failed.
    InternalError,
    /// The project ran out of task quota.
    QuotaExceeded,
    /// Exceeded the flow timeout.
    Timeout,
    /// Stopped on request.
    Stopped,
}

impl FlowRunStatus {
    /// Returns true if the run will not change status again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Queued | Self::Running | Self::Paused => false,
            Self::Succeeded
            | Self::Failed
            | Self::InternalError
            | Self::QuotaExceeded
            | Self::Timeout
            | Self::Stopped => true,
        }
    }

    /// Returns true if a production run ending here should raise an issue.
    #[must_use]
    pub fn raises_issue(&self) -> bool {
        matches!(
            self,
            Self::Failed | Self::InternalError | Self::QuotaExceeded | Self::Timeout
        )
    }
}

/// Why a run is paused and what resumes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseMetadata {
    /// Resume at a fixed time; driven by the job queue.
    Delay {
        /// When the run becomes eligible to resume (ISO-8601 on the wire).
        #[serde(rename = "resumeDateTime")]
        resume_date_time: DateTime<Utc>,
    },
    /// Resume when a webhook arrives; driven externally.
    Webhook {
        /// Correlates the inbound resume request.
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// How an execution job should treat the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    /// Start from the trigger.
    BeginExecution,
    /// Continue a paused run.
    ResumeExecution,
}

/// Run-log hook an execution job should fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HookType {
    /// Fire before the run log is written.
    BeforeLog,
    /// Fire after the run log is written.
    AfterLog,
}

/// A single execution of a flow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    /// Run identifier; also the id of the jobs that drive it.
    pub id: FlowRunId,
    /// The flow being executed.
    pub flow_id: FlowId,
    /// Owning project.
    pub project_id: ProjectId,
    /// The exact version being executed.
    pub flow_version_id: FlowVersionId,
    /// Production or testing.
    pub environment: RunEnvironment,
    /// Current status.
    pub status: FlowRunStatus,
    /// Present iff `status` is [`FlowRunStatus::Paused`].
    pub pause_metadata: Option<PauseMetadata>,
    /// Tasks consumed; set once the run finishes.
    pub tasks: Option<u32>,
    /// When the run was created.
    pub created_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl FlowRun {
    /// Creates a queued run.
    #[must_use]
    pub fn new(
        flow_id: FlowId,
        flow_version_id: FlowVersionId,
        project_id: ProjectId,
        environment: RunEnvironment,
    ) -> Self {
        Self {
            id: FlowRunId::new(),
            flow_id,
            project_id,
            flow_version_id,
            environment,
            status: FlowRunStatus::Queued,
            pause_metadata: None,
            tasks: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Pauses the run, recording what will resume it.
    pub fn pause(&mut self, metadata: PauseMetadata) {
        self.status = FlowRunStatus::Paused;
        self.pause_metadata = Some(metadata);
    }

    /// Moves the run to a non-paused status, dropping any pause metadata.
    ///
    /// Use [`FlowRun::pause`] to enter the paused state.
    pub fn set_status(&mut self, status: FlowRunStatus) {
        if status != FlowRunStatus::Paused {
            self.pause_metadata = None;
        }
        self.status = status;
    }

    /// Marks the run finished with the given terminal status.
    pub fn finish(&mut self, status: FlowRunStatus, tasks: u32) {
        self.set_status(status);
        self.tasks = Some(tasks);
        self.finished_at = Some(Utc::now());
    }
}
