//! Trigger activation.
//!
//! Enabling a flow version's trigger is a round trip to the engine's
//! `ON_ENABLE` hook followed by strategy-specific side effects: app event
//! listeners for `APP_WEBHOOK`, a renewal schedule for `WEBHOOK`, and a
//! polling schedule for `POLLING`. Nothing is scheduled or registered unless
//! the engine answers OK.

use crate::engine::{
    AppEventListener, AppEventRouting, EngineRequest, EngineResponse, TriggerEngine,
    TriggerHookType,
};
use crate::error::TriggerError;
use crate::piece::{
    PieceMetadataLookup, TriggerStrategy, WebhookRenewConfiguration, WebhookUrlResolver,
};
use crate::polling::{PollingIntervalPolicy, every_x_minutes_cron};
use autoflow_config::{ConfigResolver, SystemProp};
use autoflow_core::ProjectId;
use autoflow_flow::{FlowVersion, RunEnvironment};
use autoflow_queue::{Job, JobPayload, JobQueue, RepeatableJobData, ScheduleOptions};
use rootcause::prelude::Report;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(60);

/// External services the activator talks to.
#[derive(Clone)]
pub struct TriggerCollaborators {
    pub pieces: Arc<dyn PieceMetadataLookup>,
    pub webhooks: Arc<dyn WebhookUrlResolver>,
    pub engine: Arc<dyn TriggerEngine>,
    pub app_events: Arc<dyn AppEventRouting>,
}

/// Input of [`TriggerActivator::enable`].
#[derive(Debug, Clone)]
pub struct EnableTriggerParams {
    pub flow_version: FlowVersion,
    pub project_id: ProjectId,
    /// Enable against the test webhook endpoint.
    pub simulate: bool,
}

/// Activates flow version triggers.
pub struct TriggerActivator {
    collaborators: TriggerCollaborators,
    queue: Arc<dyn JobQueue>,
    polling: Arc<dyn PollingIntervalPolicy>,
    timeout: Duration,
}

impl TriggerActivator {
    /// Creates an activator with an explicit engine timeout.
    #[must_use]
    pub fn new(
        collaborators: TriggerCollaborators,
        queue: Arc<dyn JobQueue>,
        polling: Arc<dyn PollingIntervalPolicy>,
        timeout: Duration,
    ) -> Self {
        Self {
            collaborators,
            queue,
            polling,
            timeout,
        }
    }

    /// Creates an activator whose engine timeout comes from
    /// `TRIGGER_TIMEOUT_SECONDS`.
    #[must_use]
    pub fn from_config(
        collaborators: TriggerCollaborators,
        queue: Arc<dyn JobQueue>,
        polling: Arc<dyn PollingIntervalPolicy>,
        config: &ConfigResolver,
    ) -> Self {
        let timeout = config
            .get_number(SystemProp::TriggerTimeoutSeconds)
            .and_then(|n| u64::try_from(n).ok())
            .filter(|n| *n > 0)
            .map_or(DEFAULT_TRIGGER_TIMEOUT, Duration::from_secs);
        Self::new(collaborators, queue, polling, timeout)
    }

    /// The bound on the engine round trip.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Enables the trigger of a flow version.
    ///
    /// Returns `None` when the trigger is not piece-based. Otherwise returns
    /// the engine response; a non-OK response is returned unchanged and
    /// nothing is scheduled. For polling triggers the response carries the
    /// schedule that was actually installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the piece trigger is unknown, a collaborator
    /// fails, or the job queue rejects the schedule.
    #[instrument(
        skip(self, params),
        fields(
            flow_version_id = %params.flow_version.id,
            project_id = %params.project_id,
            simulate = params.simulate,
        )
    )]
    pub async fn enable(
        &self,
        params: EnableTriggerParams,
    ) -> Result<Option<EngineResponse>, Report<TriggerError>> {
        let EnableTriggerParams {
            flow_version,
            project_id,
            simulate,
        } = params;

        let Some(settings) = flow_version.piece_trigger() else {
            debug!("trigger is not piece-based, nothing to enable");
            return Ok(None);
        };

        let piece_trigger = self
            .collaborators
            .pieces
            .get_piece_trigger(settings, project_id)
            .await?
            .ok_or_else(|| TriggerError::PieceTriggerNotFound {
                piece_name: settings.piece_name.clone(),
                trigger_name: settings.trigger_name.clone(),
            })?;
        let app_name = settings.piece_name.clone();

        let webhook_url = self
            .collaborators
            .webhooks
            .webhook_url(flow_version.flow_id, simulate)
            .await?;

        let request = EngineRequest {
            hook_type: TriggerHookType::OnEnable,
            flow_version: flow_version.clone(),
            webhook_url,
            project_id,
            test: simulate,
        };
        let response = match tokio::time::timeout(
            self.timeout,
            self.collaborators.engine.execute_trigger_hook(request),
        )
        .await
        {
            Ok(response) => response?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "trigger hook timed out");
                EngineResponse::timed_out()
            }
        };

        if !response.is_ok() {
            warn!(status = ?response.status, "engine rejected trigger enable");
            return Ok(Some(response));
        }

        match piece_trigger.strategy {
            TriggerStrategy::AppWebhook => {
                self.register_listeners(&flow_version, project_id, app_name, &response)
                    .await?;
                Ok(Some(response))
            }
            TriggerStrategy::Webhook { renew } => {
                if let Some(WebhookRenewConfiguration::Cron { cron_expression }) = renew {
                    let job = Job::repeating(
                        flow_version.id,
                        ScheduleOptions::utc(cron_expression),
                        JobPayload::Repeatable(RepeatableJobData::RenewWebhook {
                            flow_id: flow_version.flow_id,
                            flow_version_id: flow_version.id,
                            project_id,
                            environment: RunEnvironment::Production,
                        }),
                    );
                    self.schedule(&flow_version, job).await?;
                    info!("webhook renewal scheduled");
                }
                Ok(Some(response))
            }
            TriggerStrategy::Polling => {
                let mut response = response;
                let mut result = response.result.take().unwrap_or_default();
                let schedule_options = match result.schedule_options.take() {
                    Some(options) => options,
                    None => {
                        let minutes = self.polling.interval_minutes(project_id).await?;
                        ScheduleOptions::utc(every_x_minutes_cron(minutes))
                    }
                };

                let job = Job::repeating(
                    flow_version.id,
                    schedule_options.clone(),
                    JobPayload::Repeatable(RepeatableJobData::ExecuteTrigger {
                        flow_id: flow_version.flow_id,
                        flow_version_id: flow_version.id,
                        project_id,
                        environment: RunEnvironment::Production,
                    }),
                );
                self.schedule(&flow_version, job).await?;
                info!(cron = %schedule_options.cron_expression, "polling trigger scheduled");

                result.schedule_options = Some(schedule_options);
                response.result = Some(result);
                Ok(Some(response))
            }
        }
    }

    async fn register_listeners(
        &self,
        flow_version: &FlowVersion,
        project_id: ProjectId,
        app_name: String,
        response: &EngineResponse,
    ) -> Result<(), Report<TriggerError>> {
        let listeners = response
            .result
            .as_ref()
            .map(|result| result.listeners.as_slice())
            .unwrap_or_default();

        for listener in listeners {
            self.collaborators
                .app_events
                .create_listener(AppEventListener {
                    project_id,
                    flow_id: flow_version.flow_id,
                    app_name: app_name.clone(),
                    events: listener.events.clone(),
                    identifier_value: listener.identifier_value.clone(),
                })
                .await?;
        }
        debug!(count = listeners.len(), "app event listeners registered");
        Ok(())
    }

    async fn schedule(&self, flow_version: &FlowVersion, job: Job) -> Result<(), Report<TriggerError>> {
        self.queue.add(job).await.map_err(|report| {
            report.context(TriggerError::Scheduling {
                flow_version_id: flow_version.id,
            })
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineResponseStatus, TriggerEnableResult, TriggerListener};
    use crate::piece::PieceTrigger;
    use crate::polling::ConfiguredPollingInterval;
    use async_trait::async_trait;
    use autoflow_core::FlowId;
    use autoflow_flow::{FlowTrigger, PieceTriggerSettings};
    use autoflow_queue::{JobId, JobKind, MemoryJobQueue, QueueError};
    use std::sync::Mutex;

    struct FakePieces {
        trigger: Option<PieceTrigger>,
    }

    #[async_trait]
    impl PieceMetadataLookup for FakePieces {
        async fn get_piece_trigger(
            &self,
            _settings: &PieceTriggerSettings,
            _project_id: ProjectId,
        ) -> Result<Option<PieceTrigger>, Report<TriggerError>> {
            Ok(self.trigger.clone())
        }
    }

    struct FakeWebhooks;

    #[async_trait]
    impl WebhookUrlResolver for FakeWebhooks {
        async fn webhook_url(
            &self,
            flow_id: FlowId,
            simulate: bool,
        ) -> Result<String, Report<TriggerError>> {
            let suffix = if simulate { "/test" } else { "" };
            Ok(format!("https://hooks.example.com/{flow_id}{suffix}"))
        }
    }

    struct FakeEngine {
        response: EngineResponse,
        delay: Duration,
        requests: Arc<Mutex<Vec<EngineRequest>>>,
    }

    #[async_trait]
    impl TriggerEngine for FakeEngine {
        async fn execute_trigger_hook(
            &self,
            request: EngineRequest,
        ) -> Result<EngineResponse, Report<TriggerError>> {
            self.requests.lock().unwrap().push(request);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self.response.clone())
        }
    }

    #[derive(Default)]
    struct FakeAppEvents {
        listeners: Arc<Mutex<Vec<AppEventListener>>>,
    }

    #[async_trait]
    impl AppEventRouting for FakeAppEvents {
        async fn create_listener(
            &self,
            listener: AppEventListener,
        ) -> Result<(), Report<TriggerError>> {
            self.listeners.lock().unwrap().push(listener);
            Ok(())
        }

        async fn delete_listeners(
            &self,
            project_id: ProjectId,
            flow_id: FlowId,
        ) -> Result<(), Report<TriggerError>> {
            self.listeners
                .lock()
                .unwrap()
                .retain(|l| l.project_id != project_id || l.flow_id != flow_id);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingQueue {
        jobs: Arc<Mutex<Vec<Job>>>,
    }

    #[async_trait]
    impl JobQueue for RecordingQueue {
        async fn add(&self, job: Job) -> Result<(), Report<QueueError>> {
            self.jobs.lock().unwrap().push(job);
            Ok(())
        }

        async fn remove(&self, _id: &JobId) -> Result<bool, Report<QueueError>> {
            Ok(false)
        }

        async fn schedule_options(
            &self,
            _id: &JobId,
        ) -> Result<Option<ScheduleOptions>, Report<QueueError>> {
            Ok(None)
        }
    }

    struct Harness {
        engine_requests: Arc<Mutex<Vec<EngineRequest>>>,
        listeners: Arc<Mutex<Vec<AppEventListener>>>,
        collaborators: TriggerCollaborators,
    }

    fn harness(strategy: Option<TriggerStrategy>, response: EngineResponse, delay: Duration) -> Harness {
        let engine_requests = Arc::new(Mutex::new(Vec::new()));
        let app_events = FakeAppEvents::default();
        let listeners = Arc::clone(&app_events.listeners);
        let collaborators = TriggerCollaborators {
            pieces: Arc::new(FakePieces {
                trigger: strategy.map(|strategy| PieceTrigger {
                    name: "new_row".to_string(),
                    display_name: "New Row".to_string(),
                    strategy,
                }),
            }),
            webhooks: Arc::new(FakeWebhooks),
            engine: Arc::new(FakeEngine {
                response,
                delay,
                requests: Arc::clone(&engine_requests),
            }),
            app_events: Arc::new(app_events),
        };
        Harness {
            engine_requests,
            listeners,
            collaborators,
        }
    }

    fn piece_version() -> FlowVersion {
        FlowVersion::new(
            FlowId::new(),
            "Sync rows",
            FlowTrigger::Piece(PieceTriggerSettings {
                piece_name: "@autoflow/piece-sheets".to_string(),
                piece_version: "~0.3.0".to_string(),
                trigger_name: "new_row".to_string(),
                input: serde_json::json!({ "sheet": "A" }),
            }),
        )
    }

    fn params(flow_version: FlowVersion) -> EnableTriggerParams {
        EnableTriggerParams {
            flow_version,
            project_id: ProjectId::new(),
            simulate: false,
        }
    }

    fn activator(
        harness: &Harness,
        queue: Arc<dyn JobQueue>,
        minutes: u32,
        timeout: Duration,
    ) -> TriggerActivator {
        TriggerActivator::new(
            harness.collaborators.clone(),
            queue,
            Arc::new(ConfiguredPollingInterval::new(minutes)),
            timeout,
        )
    }

    fn repeating_options(job: &Job) -> &ScheduleOptions {
        match &job.kind {
            JobKind::Repeating { schedule_options } => schedule_options,
            other => panic!("expected repeating job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_trigger_is_ignored() {
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let version = FlowVersion::new(FlowId::new(), "Draft", FlowTrigger::Empty);
        let response = activator.enable(params(version)).await.unwrap();

        assert!(response.is_none());
        assert!(h.engine_requests.lock().unwrap().is_empty());
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn polling_without_engine_schedule_uses_default_interval() {
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let version = piece_version();
        let version_id = version.id;
        let response = activator.enable(params(version)).await.unwrap().unwrap();

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, JobId::from(version_id));
        assert_eq!(
            repeating_options(&jobs[0]),
            &ScheduleOptions {
                cron_expression: "*/5 * * * *".to_string(),
                timezone: "UTC".to_string(),
                failure_count: 0,
            }
        );
        match &jobs[0].data.payload {
            JobPayload::Repeatable(RepeatableJobData::ExecuteTrigger { environment, .. }) => {
                assert_eq!(*environment, RunEnvironment::Production);
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let installed = response.result.unwrap().schedule_options.unwrap();
        assert_eq!(installed.cron_expression, "*/5 * * * *");
    }

    #[tokio::test]
    async fn polling_uses_configured_interval() {
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 15, Duration::from_secs(5));

        activator.enable(params(piece_version())).await.unwrap();

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(repeating_options(&jobs[0]).cron_expression, "*/15 * * * *");
    }

    #[tokio::test]
    async fn polling_keeps_engine_schedule() {
        let engine_options = ScheduleOptions {
            cron_expression: "0 9 * * 1-5".to_string(),
            timezone: "+02:00".to_string(),
            failure_count: 0,
        };
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult {
                listeners: Vec::new(),
                schedule_options: Some(engine_options.clone()),
            }),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let response = activator.enable(params(piece_version())).await.unwrap().unwrap();

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(repeating_options(&jobs[0]), &engine_options);
        assert_eq!(response.result.unwrap().schedule_options, Some(engine_options));
    }

    #[tokio::test]
    async fn webhook_with_cron_renewal_schedules_renewal() {
        let h = harness(
            Some(TriggerStrategy::Webhook {
                renew: Some(WebhookRenewConfiguration::Cron {
                    cron_expression: "0 */12 * * *".to_string(),
                }),
            }),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let version = piece_version();
        let version_id = version.id;
        activator.enable(params(version)).await.unwrap();

        let jobs = queue.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, JobId::from(version_id));
        assert_eq!(
            repeating_options(&jobs[0]),
            &ScheduleOptions::utc("0 */12 * * *")
        );
        assert!(matches!(
            jobs[0].data.payload,
            JobPayload::Repeatable(RepeatableJobData::RenewWebhook { .. })
        ));
    }

    #[tokio::test]
    async fn webhook_without_renewal_schedules_nothing() {
        let h = harness(
            Some(TriggerStrategy::Webhook { renew: None }),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let response = activator.enable(params(piece_version())).await.unwrap();

        assert!(response.unwrap().is_ok());
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn app_webhook_registers_each_listener() {
        let h = harness(
            Some(TriggerStrategy::AppWebhook),
            EngineResponse::ok(TriggerEnableResult {
                listeners: vec![
                    TriggerListener {
                        events: vec!["message.created".to_string()],
                        identifier_value: "team-1".to_string(),
                    },
                    TriggerListener {
                        events: vec!["reaction.added".to_string(), "reaction.removed".to_string()],
                        identifier_value: "team-2".to_string(),
                    },
                ],
                schedule_options: None,
            }),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let version = piece_version();
        let flow_id = version.flow_id;
        let request = params(version);
        let project_id = request.project_id;
        activator.enable(request).await.unwrap();

        let listeners = h.listeners.lock().unwrap();
        assert_eq!(listeners.len(), 2);
        assert!(listeners.iter().all(|l| l.project_id == project_id
            && l.flow_id == flow_id
            && l.app_name == "@autoflow/piece-sheets"));
        assert_eq!(listeners[1].events.len(), 2);
        assert_eq!(listeners[1].identifier_value, "team-2");
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_ok_response_is_returned_verbatim() {
        let failed = EngineResponse {
            status: EngineResponseStatus::Failed,
            result: None,
            standard_error: Some("invalid credentials".to_string()),
        };
        let h = harness(Some(TriggerStrategy::Polling), failed.clone(), Duration::ZERO);
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let response = activator.enable(params(piece_version())).await.unwrap();

        assert_eq!(response, Some(failed));
        assert!(queue.jobs.lock().unwrap().is_empty());
        assert!(h.listeners.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_engine_times_out_without_scheduling() {
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::from_secs(1),
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_millis(50));

        let response = activator.enable(params(piece_version())).await.unwrap().unwrap();

        assert_eq!(response.status, EngineResponseStatus::Timeout);
        assert!(queue.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn enabling_twice_keeps_one_schedule() {
        let h = harness(
            Some(TriggerStrategy::Polling),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(MemoryJobQueue::new());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let version = piece_version();
        activator.enable(params(version.clone())).await.unwrap();
        activator.enable(params(version.clone())).await.unwrap();

        assert_eq!(queue.repeating_count().await, 1);
        let options = queue
            .schedule_options(&JobId::from(version.id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(options.cron_expression, "*/5 * * * *");
    }

    #[tokio::test]
    async fn unknown_piece_trigger_fails() {
        let h = harness(
            None,
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue.clone(), 5, Duration::from_secs(5));

        let err = activator.enable(params(piece_version())).await.unwrap_err();

        assert!(err.to_string().contains("new_row"));
        assert!(h.engine_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn engine_request_carries_simulation_flag() {
        let h = harness(
            Some(TriggerStrategy::Webhook { renew: None }),
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let queue = Arc::new(RecordingQueue::default());
        let activator = activator(&h, queue, 5, Duration::from_secs(5));

        let mut request = params(piece_version());
        request.simulate = true;
        activator.enable(request).await.unwrap();

        let requests = h.engine_requests.lock().unwrap();
        assert_eq!(requests[0].hook_type, TriggerHookType::OnEnable);
        assert!(requests[0].test);
        assert!(requests[0].webhook_url.ends_with("/test"));
    }

    #[test]
    fn timeout_comes_from_config() {
        let h = harness(
            None,
            EngineResponse::ok(TriggerEnableResult::default()),
            Duration::ZERO,
        );
        let config =
            ConfigResolver::from_overrides([(SystemProp::TriggerTimeoutSeconds, "12")]).unwrap();
        let activator = TriggerActivator::from_config(
            h.collaborators.clone(),
            Arc::new(RecordingQueue::default()),
            Arc::new(ConfiguredPollingInterval::new(5)),
            &config,
        );
        assert_eq!(activator.timeout(), Duration::from_secs(12));
    }
}
