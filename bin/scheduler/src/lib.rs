//! autoflow scheduler process.
//!
//! Fires due repeating schedules and promotes due delayed jobs on the shared
//! queue so that workers elsewhere can claim them.

pub mod context;
pub mod error;

pub use context::AppContext;
pub use error::SchedulerError;

use autoflow_config::{ConfigResolver, QueueMode};
use rootcause::prelude::Report;

/// Refuses queue modes whose jobs are invisible to a separate process.
///
/// # Errors
///
/// Returns [`SchedulerError::MemoryQueueMode`] for `MEMORY`, or a
/// configuration error if the mode cannot be read.
pub fn ensure_shared_queue(config: &ConfigResolver) -> Result<QueueMode, Report<SchedulerError>> {
    let mode = config
        .queue_mode()
        .map_err(|report| report.context(SchedulerError::Configuration))?;
    match mode {
        QueueMode::Memory => Err(SchedulerError::MemoryQueueMode.into()),
        QueueMode::Nats => Ok(mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoflow_config::SystemProp;

    #[test]
    fn memory_mode_is_refused() {
        let config = ConfigResolver::from_overrides([(SystemProp::QueueMode, "MEMORY")]).unwrap();
        let err = ensure_shared_queue(&config).unwrap_err();
        assert!(err.to_string().contains("AUTOFLOW_QUEUE_MODE"));
    }

    #[test]
    fn nats_mode_is_accepted() {
        let config = ConfigResolver::from_overrides([(SystemProp::QueueMode, "NATS")]).unwrap();
        assert_eq!(ensure_shared_queue(&config).unwrap(), QueueMode::Nats);
    }

    #[test]
    fn unknown_mode_is_a_configuration_error() {
        let config = ConfigResolver::from_overrides([(SystemProp::QueueMode, "KAFKA")]).unwrap();
        let err = ensure_shared_queue(&config).unwrap_err();
        assert!(err.to_string().contains("invalid scheduler configuration"));
    }
}
