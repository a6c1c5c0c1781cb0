//! Job queue for autoflow.
//!
//! This crate provides:
//!
//! - **Jobs**: one-time, delayed and repeating jobs with versioned payloads
//! - **Backends**: an in-memory queue and a NATS JetStream queue behind the
//!   [`JobQueue`] (producer) and [`JobConsumer`] (consumer) traits
//! - **Dispatcher**: worker loops that feed claimed jobs to a [`JobHandler`]

pub mod cron;
pub mod error;
pub mod job;
pub mod memory;
pub mod nats;
pub mod queue;
pub mod worker;

pub use self::cron::CronSchedule;
pub use error::QueueError;
pub use job::{
    ExecutionJobData, Job, JobData, JobId, JobKind, JobPayload, LATEST_JOB_DATA_SCHEMA_VERSION,
    Priority, RepeatableJobData, ScheduleOptions,
};
pub use memory::MemoryJobQueue;
pub use nats::{NatsJobQueue, NatsQueueConfig};
pub use queue::{
    ClaimedJob, JobConsumer, JobOrigin, JobOutcome, JobQueue, MaintenanceReport, ReadyJob,
};
pub use worker::{Dispatcher, DispatcherConfig, JobHandler};
