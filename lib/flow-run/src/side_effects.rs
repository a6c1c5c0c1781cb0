//! Queue, notification and broadcast work that follows a run's status.
//!
//! A run is driven by jobs keyed by its id: a one-time job starts or resumes
//! it, a delayed job resumes it after a timed pause. When a run finishes,
//! usage hooks, issue tracking and the finish notification run in that
//! order, and other instances learn about it over pub/sub.

use crate::collaborators::{FlowRunHooks, IssueTracker, RunNotifier};
use crate::error::SideEffectsError;
use crate::event::{FLOW_RUN_FINISHED_CHANNEL, RunFinished};
use autoflow_flow::{
    ExecutionType, FlowRun, FlowRunStatus, HookType, PauseMetadata, RunEnvironment,
};
use autoflow_pubsub::PubSubHandle;
use autoflow_queue::{
    ExecutionJobData, Job, JobPayload, JobQueue, Priority, RepeatableJobData,
};
use chrono::{DateTime, Utc};
use rootcause::prelude::Report;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Milliseconds from `now` until `resume_at`; zero if already past.
#[must_use]
pub fn resume_delay(resume_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((resume_at - now).num_milliseconds()).unwrap_or(0)
}

/// How to start a run.
#[derive(Debug, Clone, PartialEq)]
pub struct StartParams {
    pub execution_type: ExecutionType,
    /// Trigger payload handed to the engine.
    pub payload: JsonValue,
    /// Set when a caller waits synchronously for the result.
    pub synchronous_handler_id: Option<String>,
    pub hook_type: Option<HookType>,
}

impl StartParams {
    /// Begin a run from a trigger payload.
    #[must_use]
    pub fn begin(payload: JsonValue) -> Self {
        Self {
            execution_type: ExecutionType::BeginExecution,
            payload,
            synchronous_handler_id: None,
            hook_type: None,
        }
    }
}

/// Coordinates what happens around a run's status changes.
pub struct FlowRunSideEffects {
    queue: Arc<dyn JobQueue>,
    pubsub: Arc<PubSubHandle>,
    hooks: Arc<dyn FlowRunHooks>,
    issues: Arc<dyn IssueTracker>,
    notifier: Arc<dyn RunNotifier>,
}

impl FlowRunSideEffects {
    #[must_use]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        pubsub: Arc<PubSubHandle>,
        hooks: Arc<dyn FlowRunHooks>,
        issues: Arc<dyn IssueTracker>,
        notifier: Arc<dyn RunNotifier>,
    ) -> Self {
        Self {
            queue,
            pubsub,
            hooks,
            issues,
            notifier,
        }
    }

    /// Enqueues the job that executes a run.
    ///
    /// Runs with a synchronous handler are enqueued at high priority.
    ///
    /// # Errors
    ///
    /// Returns an error if the job queue rejects the job.
    #[instrument(skip(self, run, params), fields(run_id = %run.id))]
    pub async fn start(&self, run: &FlowRun, params: StartParams) -> Result<(), Report<SideEffectsError>> {
        let priority = if params.synchronous_handler_id.is_some() {
            Priority::High
        } else {
            Priority::Medium
        };

        let job = Job::one_time(
            run.id,
            priority,
            JobPayload::Execution(ExecutionJobData {
                run_id: run.id,
                flow_version_id: run.flow_version_id,
                project_id: run.project_id,
                environment: run.environment,
                execution_type: params.execution_type,
                synchronous_handler_id: params.synchronous_handler_id,
                payload: params.payload,
                hook_type: params.hook_type,
            }),
        );
        self.enqueue(run, job).await?;
        debug!(priority = priority.as_str(), "flow run enqueued");
        Ok(())
    }

    /// Schedules the resumption of a paused run.
    ///
    /// Delay pauses enqueue a delayed job; webhook pauses are resumed
    /// externally and need nothing here.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the run has no pause metadata, or an
    /// error if the job queue rejects the job.
    pub async fn pause(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>> {
        self.pause_at(run, Utc::now()).await
    }

    #[instrument(skip(self, run), fields(run_id = %run.id))]
    pub(crate) async fn pause_at(
        &self,
        run: &FlowRun,
        now: DateTime<Utc>,
    ) -> Result<(), Report<SideEffectsError>> {
        let Some(metadata) = &run.pause_metadata else {
            return Err(SideEffectsError::MissingPauseMetadata { run_id: run.id }.into());
        };

        match metadata {
            PauseMetadata::Delay { resume_date_time } => {
                let delay_ms = resume_delay(*resume_date_time, now);
                let job = Job::delayed(
                    run.id,
                    delay_ms,
                    JobPayload::Repeatable(RepeatableJobData::DelayedFlow {
                        run_id: run.id,
                        flow_version_id: run.flow_version_id,
                        project_id: run.project_id,
                        environment: run.environment,
                    }),
                );
                self.enqueue(run, job).await?;
                debug!(delay_ms, "delayed resume scheduled");
            }
            PauseMetadata::Webhook { .. } => {
                debug!("run waits for a webhook to resume");
            }
        }
        Ok(())
    }

    /// Runs the side effects of a finished run.
    ///
    /// The on-finish hook, issue recording and the run-finished broadcast
    /// are best-effort: their failures are logged. The notification always
    /// happens exactly once, and the broadcast follows it whether or not it
    /// succeeded.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a run that has not finished, or the
    /// notifier's error.
    #[instrument(skip(self, run), fields(run_id = %run.id, status = ?run.status))]
    pub async fn finish(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>> {
        if !run.status.is_terminal() {
            return Err(SideEffectsError::NotTerminal {
                run_id: run.id,
                status: run.status,
            }
            .into());
        }

        if let Err(report) = self.hooks.on_finish(run.project_id, run.tasks).await {
            warn!(error = %report, "on-finish hook failed");
        }

        if run.environment == RunEnvironment::Production && run.status.raises_issue() {
            match self.issues.record(run).await {
                Ok(()) => info!("issue recorded for failed run"),
                Err(report) => warn!(error = %report, "failed to record issue"),
            }
        }

        let notified = self.notifier.notify(run).await;

        // Remote waiters depend on this event regardless of the local outcome.
        if let Err(report) = self.publish_finished(run).await {
            warn!(error = %report, "failed to publish run-finished event");
        }
        notified
    }

    /// Dispatches on the run's current status: paused runs are scheduled
    /// for resumption, finished runs get their finish side effects.
    ///
    /// # Errors
    ///
    /// Returns the error of [`Self::pause`] or [`Self::finish`].
    pub async fn handle_transition(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>> {
        match run.status {
            FlowRunStatus::Paused => self.pause(run).await,
            status if status.is_terminal() => self.finish(run).await,
            _ => Ok(()),
        }
    }

    async fn publish_finished(&self, run: &FlowRun) -> Result<(), Report<SideEffectsError>> {
        let message = RunFinished::from_run(run).to_message()?;
        let pubsub = self.pubsub.get().await.map_err(|report| {
            report.context(SideEffectsError::Notification {
                reason: "pub/sub unavailable".to_string(),
            })
        })?;
        pubsub
            .publish(FLOW_RUN_FINISHED_CHANNEL, &message)
            .await
            .map_err(|report| {
                report.context(SideEffectsError::Notification {
                    reason: "run-finished publish failed".to_string(),
                })
            })?;
        Ok(())
    }

    async fn enqueue(&self, run: &FlowRun, job: Job) -> Result<(), Report<SideEffectsError>> {
        self.queue
            .add(job)
            .await
            .map_err(|report| report.context(SideEffectsError::Enqueue { run_id: run.id }))?;
        Ok(())
    }
}
