//! Polling interval policies.
//!
//! Self-hosted editions poll at the configured default interval. Metered
//! deployments (the `metered` feature) poll no faster than the project's
//! plan allows.

use crate::error::TriggerError;
use async_trait::async_trait;
use autoflow_config::{ConfigResolver, SystemProp};
use autoflow_core::ProjectId;
use rootcause::prelude::Report;

/// Interval used when nothing else is configured.
pub const DEFAULT_POLLING_INTERVAL_MINUTES: u32 = 5;

/// Cron expression firing every `minutes` minutes.
#[must_use]
pub fn every_x_minutes_cron(minutes: u32) -> String {
    format!("*/{minutes} * * * *")
}

/// Decides how often a polling trigger runs.
#[async_trait]
pub trait PollingIntervalPolicy: Send + Sync {
    /// Polling interval for a project's triggers, in minutes.
    async fn interval_minutes(&self, project_id: ProjectId) -> Result<u32, Report<TriggerError>>;
}

/// Fixed interval from `TRIGGER_DEFAULT_POLL_INTERVAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfiguredPollingInterval {
    minutes: u32,
}

impl ConfiguredPollingInterval {
    /// Uses an explicit interval; zero falls back to the default.
    #[must_use]
    pub fn new(minutes: u32) -> Self {
        Self {
            minutes: if minutes == 0 {
                DEFAULT_POLLING_INTERVAL_MINUTES
            } else {
                minutes
            },
        }
    }

    /// Reads the configured interval, defaulting to five minutes.
    #[must_use]
    pub fn from_config(config: &ConfigResolver) -> Self {
        let minutes = config
            .get_number(SystemProp::TriggerDefaultPollInterval)
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(DEFAULT_POLLING_INTERVAL_MINUTES);
        Self::new(minutes)
    }

    /// The interval in minutes.
    #[must_use]
    pub fn minutes(&self) -> u32 {
        self.minutes
    }
}

#[async_trait]
impl PollingIntervalPolicy for ConfiguredPollingInterval {
    async fn interval_minutes(&self, _project_id: ProjectId) -> Result<u32, Report<TriggerError>> {
        Ok(self.minutes)
    }
}

#[cfg(feature = "metered")]
pub use metered::{PlanLimits, PlanMinimumPollingInterval, ProjectPlan};

#[cfg(feature = "metered")]
mod metered {
    use super::*;
    use std::sync::Arc;
    use tracing::debug;

    /// The parts of a project plan the trigger engine reads.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ProjectPlan {
        pub minimum_polling_interval: u32,
    }

    /// Per-project plan limits.
    #[async_trait]
    pub trait PlanLimits: Send + Sync {
        /// Returns the project's plan, creating the default plan if it has none.
        async fn get_or_create_default_plan(
            &self,
            project_id: ProjectId,
        ) -> Result<ProjectPlan, Report<TriggerError>>;
    }

    /// Polls at the plan's minimum interval.
    pub struct PlanMinimumPollingInterval {
        plans: Arc<dyn PlanLimits>,
    }

    impl PlanMinimumPollingInterval {
        /// Creates a policy backed by `plans`.
        #[must_use]
        pub fn new(plans: Arc<dyn PlanLimits>) -> Self {
            Self { plans }
        }
    }

    #[async_trait]
    impl PollingIntervalPolicy for PlanMinimumPollingInterval {
        async fn interval_minutes(
            &self,
            project_id: ProjectId,
        ) -> Result<u32, Report<TriggerError>> {
            let plan = self
                .plans
                .get_or_create_default_plan(project_id)
                .await
                .map_err(|report| report.context(TriggerError::PlanLookup { project_id }))?;
            debug!(
                %project_id,
                minutes = plan.minimum_polling_interval,
                "using plan polling interval"
            );
            Ok(plan.minimum_polling_interval.max(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_for_interval() {
        assert_eq!(every_x_minutes_cron(5), "*/5 * * * *");
        assert_eq!(every_x_minutes_cron(15), "*/15 * * * *");
    }

    #[test]
    fn configured_interval_reads_config() {
        let config =
            ConfigResolver::from_overrides([(SystemProp::TriggerDefaultPollInterval, "15")])
                .unwrap();
        assert_eq!(ConfiguredPollingInterval::from_config(&config).minutes(), 15);
    }

    #[test]
    fn configured_interval_defaults_to_five() {
        let config = ConfigResolver::from_overrides([(
            SystemProp::TriggerDefaultPollInterval,
            "often",
        )])
        .unwrap();
        assert_eq!(ConfiguredPollingInterval::from_config(&config).minutes(), 5);
        assert_eq!(ConfiguredPollingInterval::new(0).minutes(), 5);
    }

    #[cfg(feature = "metered")]
    mod metered_policy {
        use super::super::*;
        use std::sync::Arc;

        struct FixedPlan(u32);

        #[async_trait]
        impl PlanLimits for FixedPlan {
            async fn get_or_create_default_plan(
                &self,
                _project_id: ProjectId,
            ) -> Result<ProjectPlan, Report<TriggerError>> {
                Ok(ProjectPlan {
                    minimum_polling_interval: self.0,
                })
            }
        }

        #[tokio::test]
        async fn plan_minimum_wins() {
            let policy = PlanMinimumPollingInterval::new(Arc::new(FixedPlan(1)));
            assert_eq!(policy.interval_minutes(ProjectId::new()).await.unwrap(), 1);
        }
    }
}
