//! Producer and consumer contracts shared by every backend.

use crate::error::QueueError;
use crate::job::{Job, JobData, JobId, Priority, ScheduleOptions};
use async_trait::async_trait;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Producer side of the job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueues a job.
    ///
    /// Re-adding a repeating job replaces its schedule. Re-adding a pending
    /// one-time or delayed job is a no-op.
    async fn add(&self, job: Job) -> Result<(), Report<QueueError>>;

    /// Removes a repeating schedule and any pending job with this id.
    ///
    /// Returns whether anything was removed.
    async fn remove(&self, id: &JobId) -> Result<bool, Report<QueueError>>;

    /// The live schedule of a repeating job, including its failure count.
    async fn schedule_options(
        &self,
        id: &JobId,
    ) -> Result<Option<ScheduleOptions>, Report<QueueError>>;
}

/// Where a ready job came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOrigin {
    OneTime,
    Delayed,
    Repeating,
}

/// A job handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyJob {
    pub id: JobId,
    pub data: JobData,
    pub origin: JobOrigin,
    pub priority: Priority,
}

pub(crate) enum Receipt {
    Memory { guard: u64 },
    Nats(async_nats::jetstream::Message),
}

/// A claimed job; pass it back to [`JobConsumer::complete`].
pub struct ClaimedJob {
    pub(crate) job: ReadyJob,
    pub(crate) receipt: Receipt,
}

impl ClaimedJob {
    pub(crate) fn new(job: ReadyJob, receipt: Receipt) -> Self {
        Self { job, receipt }
    }

    /// The claimed job.
    #[must_use]
    pub fn job(&self) -> &ReadyJob {
        &self.job
    }
}

impl fmt::Debug for ClaimedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimedJob")
            .field("job", &self.job)
            .finish_non_exhaustive()
    }
}

/// Result of running a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
}

/// What a maintenance pass moved onto the ready queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Delayed jobs whose delay elapsed.
    pub promoted: usize,
    /// Repeating occurrences fired.
    pub fired: usize,
}

impl MaintenanceReport {
    /// Returns whether anything moved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.promoted == 0 && self.fired == 0
    }
}

/// Consumer side of the job queue.
#[async_trait]
pub trait JobConsumer: Send + Sync {
    /// Claims the next ready job, high priority first.
    async fn next_ready(&self) -> Result<Option<ClaimedJob>, Report<QueueError>>;

    /// Acknowledges a claimed job.
    ///
    /// For repeating jobs, `Failed` increments the failure count and
    /// `Succeeded` resets it.
    async fn complete(
        &self,
        claim: ClaimedJob,
        outcome: JobOutcome,
    ) -> Result<(), Report<QueueError>>;

    /// Promotes due delayed jobs and fires due repeating schedules.
    async fn maintain(&self) -> Result<MaintenanceReport, Report<QueueError>>;
}
