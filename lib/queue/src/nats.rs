//! NATS JetStream job queue.
//!
//! - One-time jobs go to a work-queue stream on `autoflow.jobs.<priority>`,
//!   deduplicated by the `Nats-Msg-Id` header. Two durable pull consumers
//!   drain it, high priority first.
//! - Delayed jobs wait in the `autoflow-delayed` KV bucket (create-only) and
//!   are published to the medium subject once due.
//! - Repeating jobs live in the `autoflow-schedules` KV bucket. A due
//!   occurrence is published under a message id derived from its fire time
//!   and only then advanced with a revision-checked update. Racing
//!   schedulers publish the same id and the broker keeps one copy.
//! - A record that cannot be processed is logged and skipped; the rest of
//!   the maintenance pass goes on.

use crate::cron::CronSchedule;
use crate::error::QueueError;
use crate::job::{Job, JobData, JobId, JobKind, Priority, ScheduleOptions, eligible_at};
use crate::queue::{
    ClaimedJob, JobConsumer, JobOrigin, JobOutcome, JobQueue, MaintenanceReport, ReadyJob,
    Receipt,
};
use async_nats::jetstream::{self, AckKind, consumer::PullConsumer, kv};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Subject prefix for job messages.
const JOBS_SUBJECT_PREFIX: &str = "autoflow.jobs";

/// Stream name for job messages.
const JOBS_STREAM_NAME: &str = "AUTOFLOW_JOBS";

/// KV bucket holding delayed jobs until they are due.
const DELAYED_BUCKET: &str = "autoflow-delayed";

/// KV bucket holding repeating schedules.
const SCHEDULES_BUCKET: &str = "autoflow-schedules";

/// Window in which a repeated `Nats-Msg-Id` is dropped by the broker.
const DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

/// Attempts at a revision-checked failure counter update.
const CAS_ATTEMPTS: usize = 5;

/// Configuration for the NATS job queue.
#[derive(Debug, Clone)]
pub struct NatsQueueConfig {
    /// NATS server URL.
    pub url: String,
    /// Stream name (defaults to AUTOFLOW_JOBS).
    pub stream_name: Option<String>,
}

impl NatsQueueConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(JOBS_STREAM_NAME)
    }
}

fn subject(priority: Priority) -> String {
    format!("{JOBS_SUBJECT_PREFIX}.{}", priority.as_str())
}

fn consumer_name(priority: Priority) -> String {
    format!("autoflow-jobs-{}", priority.as_str())
}

/// KV keys allow `[-/_=.a-zA-Z0-9]`; anything else is hex-encoded.
fn kv_key(id: &JobId) -> String {
    let raw = id.as_str();
    if !raw.is_empty()
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '='))
    {
        raw.to_string()
    } else {
        let hex: String = raw.bytes().map(|b| format!("{b:02x}")).collect();
        format!("x-{hex}")
    }
}

/// Message id for a scheduled publication; stable across racing schedulers.
fn occurrence_msg_id(id: &JobId, at: DateTime<Utc>) -> String {
    format!("{id}@{}", at.timestamp_millis())
}

/// Body of a job message on the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JobMessage {
    id: JobId,
    origin: JobOrigin,
    data: JobData,
}

/// A delayed job waiting for its eligibility time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelayedRecord {
    id: JobId,
    due_at: DateTime<Utc>,
    data: JobData,
}

impl DelayedRecord {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// A repeating schedule and its next occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleRecord {
    id: JobId,
    options: ScheduleOptions,
    data: JobData,
    next_fire_at: DateTime<Utc>,
}

impl ScheduleRecord {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at <= now
    }

    /// The record after firing at `now`, or `None` if the schedule is exhausted.
    fn advanced(&self, now: DateTime<Utc>) -> Result<Option<Self>, Report<QueueError>> {
        let schedule = CronSchedule::from_options(&self.options)?;
        Ok(schedule.next_after(now).map(|next_fire_at| Self {
            next_fire_at,
            ..self.clone()
        }))
    }

    fn record_outcome(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Succeeded => self.options.failure_count = 0,
            JobOutcome::Failed => {
                self.options.failure_count = self.options.failure_count.saturating_add(1);
            }
        }
    }
}

/// What a maintenance pass does with one stored schedule.
#[derive(Debug)]
enum ScheduleStep {
    /// The next occurrence is still ahead.
    Wait,
    /// The cron expression has no further occurrences.
    Exhausted,
    /// Publish `message` under `msg_id`, then store `next`.
    Fire {
        msg_id: String,
        message: JobMessage,
        next: ScheduleRecord,
    },
}

fn schedule_step(raw: &[u8], now: DateTime<Utc>) -> Result<ScheduleStep, Report<QueueError>> {
    let record: ScheduleRecord = decode(raw)?;
    if !record.is_due(now) {
        return Ok(ScheduleStep::Wait);
    }
    let Some(next) = record.advanced(now)? else {
        return Ok(ScheduleStep::Exhausted);
    };
    Ok(ScheduleStep::Fire {
        msg_id: occurrence_msg_id(&record.id, record.next_fire_at),
        message: JobMessage {
            id: record.id,
            origin: JobOrigin::Repeating,
            data: record.data,
        },
        next,
    })
}

/// The message id and body to publish for a stored delayed job, once due.
fn delayed_step(
    raw: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<(String, JobMessage)>, Report<QueueError>> {
    let record: DelayedRecord = decode(raw)?;
    if !record.is_due(now) {
        return Ok(None);
    }
    Ok(Some((
        occurrence_msg_id(&record.id, record.due_at),
        JobMessage {
            id: record.id,
            origin: JobOrigin::Delayed,
            data: record.data,
        },
    )))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Report<QueueError>> {
    serde_json::to_vec(value).map_err(|e| {
        QueueError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, Report<QueueError>> {
    serde_json::from_slice(bytes).map_err(|e| {
        QueueError::Serialization {
            reason: e.to_string(),
        }
        .into()
    })
}

fn storage_failed(e: impl std::fmt::Display) -> QueueError {
    QueueError::StorageFailed {
        reason: e.to_string(),
    }
}

/// JetStream-backed [`JobQueue`] and [`JobConsumer`].
pub struct NatsJobQueue {
    jetstream: jetstream::Context,
    high: PullConsumer,
    medium: PullConsumer,
    delayed: kv::Store,
    schedules: kv::Store,
}

impl NatsJobQueue {
    /// Connects and ensures the stream, consumers and buckets exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or any setup step fails.
    pub async fn connect(config: NatsQueueConfig) -> Result<Self, Report<QueueError>> {
        let client = async_nats::connect(&config.url).await.map_err(|e| {
            QueueError::ConnectionFailed {
                reason: e.to_string(),
            }
        })?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream().to_string(),
                subjects: vec![format!("{JOBS_SUBJECT_PREFIX}.>")],
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                duplicate_window: DUPLICATE_WINDOW,
                ..Default::default()
            })
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                reason: format!("failed to create jobs stream: {e}"),
            })?;

        let mut consumers = Vec::with_capacity(2);
        for priority in [Priority::High, Priority::Medium] {
            let name = consumer_name(priority);
            let consumer: PullConsumer = stream
                .get_or_create_consumer(
                    &name,
                    jetstream::consumer::pull::Config {
                        durable_name: Some(name.clone()),
                        filter_subject: subject(priority),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| QueueError::ConnectionFailed {
                    reason: format!("failed to create consumer {name}: {e}"),
                })?;
            consumers.push(consumer);
        }
        let (Some(medium), Some(high)) = (consumers.pop(), consumers.pop()) else {
            return Err(QueueError::ConnectionFailed {
                reason: "job consumers were not created".to_string(),
            }
            .into());
        };

        let delayed = Self::bucket(&jetstream, DELAYED_BUCKET).await?;
        let schedules = Self::bucket(&jetstream, SCHEDULES_BUCKET).await?;

        info!(url = %config.url, stream = config.stream(), "connected NATS job queue");

        Ok(Self {
            jetstream,
            high,
            medium,
            delayed,
            schedules,
        })
    }

    async fn bucket(
        jetstream: &jetstream::Context,
        name: &str,
    ) -> Result<kv::Store, Report<QueueError>> {
        if let Ok(store) = jetstream.get_key_value(name).await {
            return Ok(store);
        }
        jetstream
            .create_key_value(kv::Config {
                bucket: name.to_string(),
                history: 1,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                QueueError::ConnectionFailed {
                    reason: format!("failed to create bucket {name}: {e}"),
                }
                .into()
            })
    }

    async fn publish(
        &self,
        priority: Priority,
        msg_id: &str,
        message: &JobMessage,
    ) -> Result<(), Report<QueueError>> {
        let publish_failed = |e: &dyn std::fmt::Display| QueueError::PublishFailed {
            job_id: message.id.to_string(),
            reason: e.to_string(),
        };

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(async_nats::header::NATS_MESSAGE_ID, msg_id);
        let bytes = encode(message)?;

        self.jetstream
            .publish_with_headers(subject(priority), headers, bytes.into())
            .await
            .map_err(|e| publish_failed(&e))?
            .await
            .map_err(|e| publish_failed(&e))?;
        Ok(())
    }

    async fn fetch_one(
        consumer: &PullConsumer,
    ) -> Result<Option<jetstream::Message>, Report<QueueError>> {
        let mut batch = consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| QueueError::ConsumeFailed {
                reason: e.to_string(),
            })?;

        match batch.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(QueueError::ConsumeFailed {
                reason: e.to_string(),
            }
            .into()),
            None => Ok(None),
        }
    }

    async fn live_entry(
        store: &kv::Store,
        key: &str,
    ) -> Result<Option<kv::Entry>, Report<QueueError>> {
        let entry = store.entry(key).await.map_err(storage_failed)?;
        Ok(entry.filter(|e| e.operation == kv::Operation::Put))
    }

    async fn keys(store: &kv::Store) -> Result<Vec<String>, Report<QueueError>> {
        let keys = store.keys().await.map_err(storage_failed)?;
        let keys: Vec<String> = keys.try_collect().await.map_err(storage_failed)?;
        Ok(keys)
    }

    async fn promote_delayed(&self, now: DateTime<Utc>) -> Result<usize, Report<QueueError>> {
        let mut promoted = 0;
        for key in Self::keys(&self.delayed).await? {
            match self.promote_one(&key, now).await {
                Ok(true) => promoted += 1,
                Ok(false) => {}
                Err(report) => warn!(key = %key, error = %report, "skipping delayed job"),
            }
        }
        Ok(promoted)
    }

    async fn promote_one(&self, key: &str, now: DateTime<Utc>) -> Result<bool, Report<QueueError>> {
        let Some(entry) = Self::live_entry(&self.delayed, key).await? else {
            return Ok(false);
        };
        let Some((msg_id, message)) = delayed_step(&entry.value, now)? else {
            return Ok(false);
        };

        self.publish(Priority::Medium, &msg_id, &message).await?;
        self.delayed.delete(key).await.map_err(storage_failed)?;
        debug!(job_id = %message.id, "promoted delayed job");
        Ok(true)
    }

    async fn fire_schedules(&self, now: DateTime<Utc>) -> Result<usize, Report<QueueError>> {
        let mut fired = 0;
        for key in Self::keys(&self.schedules).await? {
            match self.fire_one(&key, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(report) => warn!(key = %key, error = %report, "skipping repeating schedule"),
            }
        }
        Ok(fired)
    }

    /// A failed publish leaves the record untouched, so the occurrence is
    /// retried on the next pass.
    async fn fire_one(&self, key: &str, now: DateTime<Utc>) -> Result<bool, Report<QueueError>> {
        let Some(entry) = Self::live_entry(&self.schedules, key).await? else {
            return Ok(false);
        };

        match schedule_step(&entry.value, now)? {
            ScheduleStep::Wait => Ok(false),
            ScheduleStep::Exhausted => {
                warn!(key, "repeating schedule has no further occurrences, removing");
                self.schedules.delete(key).await.map_err(storage_failed)?;
                Ok(false)
            }
            ScheduleStep::Fire {
                msg_id,
                message,
                next,
            } => {
                self.publish(Priority::Medium, &msg_id, &message).await?;
                match self
                    .schedules
                    .update(key, encode(&next)?.into(), entry.revision)
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(e) => {
                        debug!(job_id = %message.id, error = %e, "occurrence advanced elsewhere");
                        Ok(false)
                    }
                }
            }
        }
    }

    async fn record_outcome(
        &self,
        id: &JobId,
        outcome: JobOutcome,
    ) -> Result<(), Report<QueueError>> {
        let key = kv_key(id);
        for _ in 0..CAS_ATTEMPTS {
            let Some(entry) = Self::live_entry(&self.schedules, &key).await? else {
                return Ok(());
            };
            let mut record: ScheduleRecord = decode(&entry.value)?;
            record.record_outcome(outcome);

            match self
                .schedules
                .update(&key, encode(&record)?.into(), entry.revision)
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => debug!(job_id = %id, error = %e, "failure count update raced, retrying"),
            }
        }
        warn!(job_id = %id, "gave up updating failure count");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for NatsJobQueue {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn add(&self, job: Job) -> Result<(), Report<QueueError>> {
        let Job { id, kind, data } = job;
        let now = Utc::now();

        match kind {
            JobKind::OneTime { priority } => {
                let message = JobMessage {
                    id: id.clone(),
                    origin: JobOrigin::OneTime,
                    data,
                };
                self.publish(priority, id.as_str(), &message).await
            }
            JobKind::Delayed { delay_ms } => {
                let record = DelayedRecord {
                    id: id.clone(),
                    due_at: eligible_at(now, delay_ms),
                    data,
                };
                match self.delayed.create(&kv_key(&id), encode(&record)?.into()).await {
                    Ok(_) => Ok(()),
                    Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                        debug!("delayed job already pending, ignoring");
                        Ok(())
                    }
                    Err(e) => Err(storage_failed(e).into()),
                }
            }
            JobKind::Repeating { schedule_options } => {
                let schedule = CronSchedule::from_options(&schedule_options)?;
                let record = ScheduleRecord {
                    next_fire_at: schedule.require_next_after(now)?,
                    id: id.clone(),
                    options: schedule_options,
                    data,
                };
                self.schedules
                    .put(kv_key(&id), encode(&record)?.into())
                    .await
                    .map_err(storage_failed)?;
                debug!(next = %record.next_fire_at, "repeating job scheduled");
                Ok(())
            }
        }
    }

    /// One-time jobs already on the stream are not recalled.
    async fn remove(&self, id: &JobId) -> Result<bool, Report<QueueError>> {
        let key = kv_key(id);
        let mut removed = false;
        for store in [&self.delayed, &self.schedules] {
            if Self::live_entry(store, &key).await?.is_some() {
                store.delete(&key).await.map_err(storage_failed)?;
                removed = true;
            }
        }
        Ok(removed)
    }

    async fn schedule_options(
        &self,
        id: &JobId,
    ) -> Result<Option<ScheduleOptions>, Report<QueueError>> {
        let Some(entry) = Self::live_entry(&self.schedules, &kv_key(id)).await? else {
            return Ok(None);
        };
        let record: ScheduleRecord = decode(&entry.value)?;
        Ok(Some(record.options))
    }
}

#[async_trait]
impl JobConsumer for NatsJobQueue {
    async fn next_ready(&self) -> Result<Option<ClaimedJob>, Report<QueueError>> {
        for (priority, consumer) in [(Priority::High, &self.high), (Priority::Medium, &self.medium)]
        {
            let Some(message) = Self::fetch_one(consumer).await? else {
                continue;
            };
            let body: JobMessage = match decode(&message.payload) {
                Ok(body) => body,
                Err(report) => {
                    // Undecodable messages would be redelivered forever.
                    let _ = message.ack_with(AckKind::Term).await;
                    return Err(report);
                }
            };
            let job = ReadyJob {
                id: body.id,
                data: body.data,
                origin: body.origin,
                priority,
            };
            return Ok(Some(ClaimedJob::new(job, Receipt::Nats(message))));
        }
        Ok(None)
    }

    async fn complete(
        &self,
        claim: ClaimedJob,
        outcome: JobOutcome,
    ) -> Result<(), Report<QueueError>> {
        let ClaimedJob { job, receipt } = claim;
        let Receipt::Nats(message) = receipt else {
            return Err(QueueError::ConsumeFailed {
                reason: format!("job {} was not claimed from NATS", job.id),
            }
            .into());
        };

        let ack = match outcome {
            JobOutcome::Succeeded => message.ack().await,
            JobOutcome::Failed => message.ack_with(AckKind::Term).await,
        };
        ack.map_err(|e| QueueError::ConsumeFailed {
            reason: e.to_string(),
        })?;

        if job.origin == JobOrigin::Repeating {
            self.record_outcome(&job.id, outcome).await?;
        }
        Ok(())
    }

    async fn maintain(&self) -> Result<MaintenanceReport, Report<QueueError>> {
        let now = Utc::now();
        let promoted = self.promote_delayed(now).await?;
        let fired = self.fire_schedules(now).await?;
        Ok(MaintenanceReport { promoted, fired })
    }
}
