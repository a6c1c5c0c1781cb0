//! Job dispatch loop.
//!
//! The dispatcher owns no job logic: it claims jobs from a [`JobConsumer`],
//! hands them to a [`JobHandler`] and acknowledges them with the handler's
//! outcome. A separate loop runs queue maintenance so due delayed and
//! repeating jobs keep flowing.

use crate::queue::{JobConsumer, JobOutcome, ReadyJob};
use async_trait::async_trait;
use autoflow_config::{ConfigResolver, SystemProp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DEFAULT_CONCURRENCY: usize = 10;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Executes claimed jobs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Runs a job and reports how it went.
    async fn handle(&self, job: &ReadyJob) -> JobOutcome;
}

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent worker loops.
    pub concurrency: usize,
    /// Idle wait when no job is ready.
    pub poll_interval: Duration,
    /// Period of the maintenance loop.
    pub maintenance_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            maintenance_interval: DEFAULT_MAINTENANCE_INTERVAL,
        }
    }
}

impl DispatcherConfig {
    /// Reads concurrency and poll interval from configuration.
    #[must_use]
    pub fn from_config(config: &ConfigResolver) -> Self {
        let defaults = Self::default();
        let concurrency = config
            .get_number(SystemProp::FlowWorkerConcurrency)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.concurrency);
        let poll_interval = config
            .get_number(SystemProp::QueuePollIntervalMs)
            .and_then(|n| u64::try_from(n).ok())
            .map_or(defaults.poll_interval, Duration::from_millis);

        Self {
            concurrency,
            poll_interval,
            ..defaults
        }
    }
}

/// Runs worker loops and queue maintenance until shutdown.
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Creates a dispatcher.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Runs until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(
        &self,
        consumer: Arc<dyn JobConsumer>,
        handler: Arc<dyn JobHandler>,
        shutdown: watch::Receiver<bool>,
    ) {
        let mut tasks = JoinSet::new();

        for worker in 0..self.config.concurrency {
            tasks.spawn(worker_loop(
                worker,
                Arc::clone(&consumer),
                Arc::clone(&handler),
                self.config.poll_interval,
                shutdown.clone(),
            ));
        }
        tasks.spawn(maintenance_loop(
            Arc::clone(&consumer),
            self.config.maintenance_interval,
            shutdown,
        ));

        info!(concurrency = self.config.concurrency, "dispatcher started");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "dispatcher task panicked");
            }
        }
        info!("dispatcher stopped");
    }

    /// Runs only the maintenance loop, for processes that schedule but do
    /// not execute jobs.
    pub async fn run_maintenance(
        &self,
        consumer: Arc<dyn JobConsumer>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!(interval = ?self.config.maintenance_interval, "queue maintenance started");
        maintenance_loop(consumer, self.config.maintenance_interval, shutdown).await;
        info!("queue maintenance stopped");
    }
}

/// Waits for `period` or shutdown; returns true if the loop should stop.
async fn pause(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(period) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn worker_loop(
    worker: usize,
    consumer: Arc<dyn JobConsumer>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match consumer.next_ready().await {
            Ok(Some(claim)) => {
                let job = claim.job();
                debug!(worker, job_id = %job.id, origin = ?job.origin, "running job");
                let outcome = handler.handle(job).await;
                let job_id = job.id.clone();
                if let Err(e) = consumer.complete(claim, outcome).await {
                    warn!(worker, job_id = %job_id, error = %e, "failed to complete job");
                }
            }
            Ok(None) => {
                if pause(poll_interval, &mut shutdown).await {
                    break;
                }
            }
            Err(e) => {
                warn!(worker, error = %e, "failed to claim job");
                if pause(poll_interval, &mut shutdown).await {
                    break;
                }
            }
        }
    }
}

async fn maintenance_loop(
    consumer: Arc<dyn JobConsumer>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match consumer.maintain().await {
            Ok(report) if !report.is_empty() => {
                debug!(promoted = report.promoted, fired = report.fired, "queue maintenance");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "queue maintenance failed"),
        }
        if pause(interval, &mut shutdown).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, JobId, JobPayload, Priority, RepeatableJobData};
    use crate::memory::MemoryJobQueue;
    use crate::queue::JobQueue;
    use autoflow_core::{FlowId, FlowVersionId, ProjectId};
    use autoflow_flow::RunEnvironment;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl JobHandler for RecordingHandler {
        async fn handle(&self, job: &ReadyJob) -> JobOutcome {
            self.seen.lock().unwrap().push(job.id.to_string());
            JobOutcome::Succeeded
        }
    }

    fn payload() -> JobPayload {
        JobPayload::Repeatable(RepeatableJobData::ExecuteTrigger {
            flow_id: FlowId::new(),
            flow_version_id: FlowVersionId::new(),
            project_id: ProjectId::new(),
            environment: RunEnvironment::Production,
        })
    }

    #[test]
    fn config_from_resolver() {
        let config = ConfigResolver::from_overrides([
            (SystemProp::FlowWorkerConcurrency, "3"),
            (SystemProp::QueuePollIntervalMs, "50"),
        ])
        .unwrap();
        let dispatcher = DispatcherConfig::from_config(&config);
        assert_eq!(dispatcher.concurrency, 3);
        assert_eq!(dispatcher.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn zero_concurrency_falls_back_to_default() {
        let config =
            ConfigResolver::from_overrides([(SystemProp::FlowWorkerConcurrency, "0")]).unwrap();
        assert_eq!(
            DispatcherConfig::from_config(&config).concurrency,
            DEFAULT_CONCURRENCY
        );
    }

    #[tokio::test]
    async fn runs_jobs_until_shutdown() {
        let queue = Arc::new(MemoryJobQueue::new());
        for id in ["a", "b", "c"] {
            queue
                .add(Job::one_time(JobId::new(id), Priority::Medium, payload()))
                .await
                .unwrap();
        }

        let handler = RecordingHandler::default();
        let seen = Arc::clone(&handler.seen);
        let (tx, rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(DispatcherConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            maintenance_interval: Duration::from_millis(10),
        });

        let consumer: Arc<dyn JobConsumer> = queue.clone();
        let run = tokio::spawn(async move {
            dispatcher.run(consumer, Arc::new(handler), rx).await;
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while seen.lock().unwrap().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs handled");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("dispatcher stops")
            .unwrap();

        let mut handled = seen.lock().unwrap().clone();
        handled.sort();
        assert_eq!(handled, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn maintenance_only_promotes_due_jobs() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue
            .add(Job::delayed(JobId::new("resume"), 0, payload()))
            .await
            .unwrap();
        assert!(queue.next_ready_at().await.is_some());

        let (tx, rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(DispatcherConfig {
            maintenance_interval: Duration::from_millis(10),
            ..DispatcherConfig::default()
        });
        let consumer: Arc<dyn JobConsumer> = queue.clone();
        let run = tokio::spawn(async move {
            dispatcher.run_maintenance(consumer, rx).await;
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.next_ready_at().await.is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("delayed job promoted");

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("maintenance stops")
            .unwrap();

        let claim = queue.next_ready().await.unwrap().expect("ready job");
        assert_eq!(claim.job().id, JobId::new("resume"));
    }
}
