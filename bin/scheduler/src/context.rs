//! Process-wide services, built once at startup.
//!
//! Construction order is fixed: configuration, logging, the polling policy
//! for the edition, job queue, pub/sub handle, then the components that
//! depend on them. Everything is shared by
//! `Arc`; the pub/sub backend itself connects on first use.

use crate::error::SchedulerError;
use autoflow_config::{ConfigResolver, Edition, QueueMode, SystemProp, logging};
use autoflow_flow_run::{FlowRunHooks, FlowRunSideEffects, IssueTracker, RunNotifier};
use autoflow_pubsub::PubSubHandle;
use autoflow_queue::{
    DispatcherConfig, JobConsumer, JobQueue, MemoryJobQueue, NatsJobQueue, NatsQueueConfig,
};
use autoflow_trigger::{
    AppEventRouting, ConfiguredPollingInterval, PollingIntervalPolicy, TriggerActivator,
    TriggerCollaborators, TriggerDeactivator,
};
#[cfg(feature = "metered")]
use autoflow_trigger::{PlanLimits, PlanMinimumPollingInterval};
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, instrument};

/// Shared services of one process.
pub struct AppContext {
    pub config: Arc<ConfigResolver>,
    pub queue_mode: QueueMode,
    pub queue: Arc<dyn JobQueue>,
    pub consumer: Arc<dyn JobConsumer>,
    pub pubsub: Arc<PubSubHandle>,
    pub polling: Arc<dyn PollingIntervalPolicy>,
    pub deactivator: Arc<TriggerDeactivator>,
    pub dispatcher: DispatcherConfig,
}

impl AppContext {
    /// Builds the context of a self-hosted deployment.
    ///
    /// Installs logging, opens the queue backend selected by `QUEUE_MODE`
    /// and prepares an unconnected pub/sub handle. Triggers poll at the
    /// configured default interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the queue backend
    /// cannot be opened, or `EDITION` is `CLOUD`, which needs
    /// [`AppContext::build_metered`].
    pub async fn build(config: ConfigResolver) -> Result<Self, Report<SchedulerError>> {
        Self::assemble(config, None).await
    }

    /// Builds the context with plan-based polling for the `CLOUD` edition.
    ///
    /// Other editions ignore `plans` and poll at the configured interval.
    ///
    /// # Errors
    ///
    /// See [`AppContext::build`].
    #[cfg(feature = "metered")]
    pub async fn build_metered(
        config: ConfigResolver,
        plans: Arc<dyn PlanLimits>,
    ) -> Result<Self, Report<SchedulerError>> {
        let policy: Arc<dyn PollingIntervalPolicy> =
            Arc::new(PlanMinimumPollingInterval::new(plans));
        Self::assemble(config, Some(policy)).await
    }

    async fn assemble(
        config: ConfigResolver,
        plan_policy: Option<Arc<dyn PollingIntervalPolicy>>,
    ) -> Result<Self, Report<SchedulerError>> {
        logging::init(&config);

        let edition = config
            .edition()
            .map_err(|report| report.context(SchedulerError::Configuration))?;
        let polling = polling_policy(edition, &config, plan_policy)?;

        let queue_mode = config
            .queue_mode()
            .map_err(|report| report.context(SchedulerError::Configuration))?;
        let (queue, consumer) = open_queue(&config, queue_mode).await?;

        let pubsub = PubSubHandle::from_config(&config)
            .map_err(|report| report.context(SchedulerError::PubSub))?;

        let deactivator = TriggerDeactivator::from_config(Arc::clone(&queue), &config);
        let dispatcher = DispatcherConfig::from_config(&config);

        info!(?edition, ?queue_mode, "application context ready");
        Ok(Self {
            config: Arc::new(config),
            queue_mode,
            queue,
            consumer,
            pubsub: Arc::new(pubsub),
            polling,
            deactivator: Arc::new(deactivator),
            dispatcher,
        })
    }

    /// A trigger activator wired to this context's queue and polling policy.
    #[must_use]
    pub fn trigger_activator(&self, collaborators: TriggerCollaborators) -> TriggerActivator {
        TriggerActivator::from_config(
            collaborators,
            Arc::clone(&self.queue),
            Arc::clone(&self.polling),
            &self.config,
        )
    }

    /// A deactivator that also removes the app event listeners of disabled
    /// flows.
    #[must_use]
    pub fn trigger_deactivator(&self, app_events: Arc<dyn AppEventRouting>) -> TriggerDeactivator {
        TriggerDeactivator::from_config(Arc::clone(&self.queue), &self.config)
            .with_app_events(app_events)
    }

    /// Flow run side effects wired to this context's queue and pub/sub.
    #[must_use]
    pub fn flow_run_side_effects(
        &self,
        hooks: Arc<dyn FlowRunHooks>,
        issues: Arc<dyn IssueTracker>,
        notifier: Arc<dyn RunNotifier>,
    ) -> FlowRunSideEffects {
        FlowRunSideEffects::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.pubsub),
            hooks,
            issues,
            notifier,
        )
    }

    /// Logs every property's effective value, with credentials masked.
    pub fn log_configuration(&self) {
        for prop in SystemProp::ALL {
            let value = self.config.get(prop).unwrap_or_default();
            let value = match prop {
                SystemProp::NatsUrl => redact_userinfo(&value),
                _ => value,
            };
            info!(property = prop.name(), %value, "configuration");
        }
    }
}

fn polling_policy(
    edition: Edition,
    config: &ConfigResolver,
    plan_policy: Option<Arc<dyn PollingIntervalPolicy>>,
) -> Result<Arc<dyn PollingIntervalPolicy>, Report<SchedulerError>> {
    match (edition, plan_policy) {
        (Edition::Cloud, Some(policy)) => Ok(policy),
        (Edition::Cloud, None) => Err(SchedulerError::PlanLimitsRequired.into()),
        (Edition::Community | Edition::Enterprise, _) => {
            Ok(Arc::new(ConfiguredPollingInterval::from_config(config)))
        }
    }
}

/// Replaces the `user:password@` part of a URL.
fn redact_userinfo(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{scheme}://***@{}", &rest[at + 1..]),
        None => url.to_string(),
    }
}

#[instrument(skip(config))]
async fn open_queue(
    config: &ConfigResolver,
    mode: QueueMode,
) -> Result<(Arc<dyn JobQueue>, Arc<dyn JobConsumer>), Report<SchedulerError>> {
    match mode {
        QueueMode::Memory => {
            let queue = Arc::new(MemoryJobQueue::new());
            let producer: Arc<dyn JobQueue> = queue.clone();
            let consumer: Arc<dyn JobConsumer> = queue;
            Ok((producer, consumer))
        }
        QueueMode::Nats => {
            let url = config
                .get_or_throw(SystemProp::NatsUrl)
                .map_err(|report| report.context(SchedulerError::Configuration))?;
            let queue = Arc::new(
                NatsJobQueue::connect(NatsQueueConfig::new(url))
                    .await
                    .map_err(|report| report.context(SchedulerError::Queue))?,
            );
            let producer: Arc<dyn JobQueue> = queue.clone();
            let consumer: Arc<dyn JobConsumer> = queue;
            Ok((producer, consumer))
        }
    }
}
