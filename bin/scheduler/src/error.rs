//! Startup errors of the scheduler process.

use std::fmt;

/// Errors raised while assembling or running the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Configuration could not be loaded or is invalid.
    Configuration,
    /// The job queue backend could not be reached.
    Queue,
    /// The pub/sub handle could not be created.
    PubSub,
    /// In-memory queues only exist inside the embedding process.
    MemoryQueueMode,
    /// The `CLOUD` edition was started without plan-based polling.
    PlanLimitsRequired,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "invalid scheduler configuration"),
            Self::Queue => write!(f, "failed to open job queue"),
            Self::PubSub => write!(f, "failed to set up pub/sub"),
            Self::MemoryQueueMode => write!(
                f,
                "the scheduler needs a shared queue; set AUTOFLOW_QUEUE_MODE=NATS"
            ),
            Self::PlanLimitsRequired => write!(
                f,
                "the CLOUD edition needs plan limits; build with the `metered` feature"
            ),
        }
    }
}

impl std::error::Error for SchedulerError {}
