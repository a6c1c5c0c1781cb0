//! Trigger deactivation and the consecutive-failure cutoff.

use crate::engine::AppEventRouting;
use crate::error::TriggerError;
use autoflow_config::{ConfigResolver, SystemProp};
use autoflow_core::{FlowVersionId, ProjectId};
use autoflow_flow::FlowVersion;
use autoflow_queue::{JobId, JobQueue};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Failures after which a schedule is disabled when nothing is configured.
pub const DEFAULT_FAILURES_THRESHOLD: u32 = 576;

/// Input of [`TriggerDeactivator::disable_flow`].
#[derive(Debug, Clone)]
pub struct DisableTriggerParams {
    pub flow_version: FlowVersion,
    pub project_id: ProjectId,
}

/// Removes trigger schedules and app event listeners.
pub struct TriggerDeactivator {
    queue: Arc<dyn JobQueue>,
    app_events: Option<Arc<dyn AppEventRouting>>,
    failures_threshold: u32,
}

impl TriggerDeactivator {
    /// Creates a deactivator. A threshold of zero never disables on failures.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, failures_threshold: u32) -> Self {
        Self {
            queue,
            app_events: None,
            failures_threshold,
        }
    }

    /// Also removes app event listeners in [`Self::disable_flow`].
    #[must_use]
    pub fn with_app_events(mut self, app_events: Arc<dyn AppEventRouting>) -> Self {
        self.app_events = Some(app_events);
        self
    }

    /// Reads the threshold from `TRIGGER_FAILURES_THRESHOLD`.
    #[must_use]
    pub fn from_config(queue: Arc<dyn JobQueue>, config: &ConfigResolver) -> Self {
        let threshold = config
            .get_number(SystemProp::TriggerFailuresThreshold)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_FAILURES_THRESHOLD);
        Self::new(queue, threshold)
    }

    /// The configured threshold.
    #[must_use]
    pub fn failures_threshold(&self) -> u32 {
        self.failures_threshold
    }

    /// Removes the repeating job owned by a flow version.
    ///
    /// Returns whether a schedule existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job queue fails.
    #[instrument(skip(self))]
    pub async fn disable(&self, flow_version_id: FlowVersionId) -> Result<bool, Report<TriggerError>> {
        let removed = self
            .queue
            .remove(&JobId::from(flow_version_id))
            .await
            .map_err(|report| report.context(TriggerError::Scheduling { flow_version_id }))?;
        if removed {
            info!("trigger schedule removed");
        } else {
            debug!("no trigger schedule to remove");
        }
        Ok(removed)
    }

    /// Disables a flow version's trigger: its schedule and, for piece
    /// triggers, the app event listeners registered for its flow.
    ///
    /// Returns whether a schedule existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the job queue or app event routing fails.
    #[instrument(skip(self, params), fields(flow_version_id = %params.flow_version.id))]
    pub async fn disable_flow(
        &self,
        params: DisableTriggerParams,
    ) -> Result<bool, Report<TriggerError>> {
        let DisableTriggerParams {
            flow_version,
            project_id,
        } = params;

        let removed = self.disable(flow_version.id).await?;
        if let (Some(app_events), Some(_)) = (&self.app_events, flow_version.piece_trigger()) {
            app_events
                .delete_listeners(project_id, flow_version.flow_id)
                .await?;
            debug!("app event listeners removed");
        }
        Ok(removed)
    }

    /// Disables the schedule once its consecutive failures reach the
    /// threshold.
    ///
    /// Returns whether the schedule was disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the job queue fails.
    #[instrument(skip(self))]
    pub async fn enforce_failure_threshold(
        &self,
        flow_version_id: FlowVersionId,
    ) -> Result<bool, Report<TriggerError>> {
        if self.failures_threshold == 0 {
            return Ok(false);
        }

        let options = self
            .queue
            .schedule_options(&JobId::from(flow_version_id))
            .await
            .map_err(|report| report.context(TriggerError::Scheduling { flow_version_id }))?;
        let Some(options) = options else {
            return Ok(false);
        };
        if options.failure_count < self.failures_threshold {
            return Ok(false);
        }

        warn!(
            failure_count = options.failure_count,
            threshold = self.failures_threshold,
            "trigger failed too many times in a row, disabling"
        );
        self.disable(flow_version_id).await
    }
}
