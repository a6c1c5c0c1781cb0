//! Logical configuration properties and their static defaults.

use std::fmt;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "AUTOFLOW";

/// A logical configuration property.
///
/// Each property is overridable through `AUTOFLOW_<NAME>` and may carry a
/// static default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemProp {
    /// Deployment edition (`CLOUD`, `COMMUNITY`, `ENTERPRISE`).
    Edition,
    /// Queue and pub/sub backend selector (`MEMORY`, `NATS`).
    QueueMode,
    /// NATS server URL for the distributed backends.
    NatsUrl,
    /// Process role (`WORKER`, `APP`, `WORKER_AND_APP`).
    ContainerType,
    /// Default polling interval in minutes.
    TriggerDefaultPollInterval,
    /// Consecutive failures after which a trigger schedule is disabled.
    TriggerFailuresThreshold,
    /// Upper bound for a trigger hook round trip to the engine.
    TriggerTimeoutSeconds,
    /// Concurrent flow executions per worker.
    FlowWorkerConcurrency,
    /// Idle sleep between queue polls, in milliseconds.
    QueuePollIntervalMs,
    /// Log level fed into the tracing filter.
    LogLevel,
    /// Human-readable multi-line log output.
    LogPretty,
    /// Free-form deployment environment label.
    Environment,
}

impl SystemProp {
    /// Every property, in declaration order.
    pub const ALL: [SystemProp; 12] = [
        Self::Edition,
        Self::QueueMode,
        Self::NatsUrl,
        Self::ContainerType,
        Self::TriggerDefaultPollInterval,
        Self::TriggerFailuresThreshold,
        Self::TriggerTimeoutSeconds,
        Self::FlowWorkerConcurrency,
        Self::QueuePollIntervalMs,
        Self::LogLevel,
        Self::LogPretty,
        Self::Environment,
    ];

    /// The upper-case property name used in environment variables.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Edition => "EDITION",
            Self::QueueMode => "QUEUE_MODE",
            Self::NatsUrl => "NATS_URL",
            Self::ContainerType => "CONTAINER_TYPE",
            Self::TriggerDefaultPollInterval => "TRIGGER_DEFAULT_POLL_INTERVAL",
            Self::TriggerFailuresThreshold => "TRIGGER_FAILURES_THRESHOLD",
            Self::TriggerTimeoutSeconds => "TRIGGER_TIMEOUT_SECONDS",
            Self::FlowWorkerConcurrency => "FLOW_WORKER_CONCURRENCY",
            Self::QueuePollIntervalMs => "QUEUE_POLL_INTERVAL_MS",
            Self::LogLevel => "LOG_LEVEL",
            Self::LogPretty => "LOG_PRETTY",
            Self::Environment => "ENVIRONMENT",
        }
    }

    /// The key under which the `config` crate stores this property.
    ///
    /// The environment source lower-cases keys after stripping the prefix.
    #[must_use]
    pub fn key(&self) -> String {
        self.name().to_ascii_lowercase()
    }

    /// The full environment variable name, e.g. `AUTOFLOW_QUEUE_MODE`.
    #[must_use]
    pub fn env_name(&self) -> String {
        format!("{ENV_PREFIX}_{}", self.name())
    }

    /// The static default, if any.
    #[must_use]
    pub const fn default_value(&self) -> Option<&'static str> {
        match self {
            Self::Edition => Some("COMMUNITY"),
            Self::QueueMode => Some("NATS"),
            Self::NatsUrl => Some("nats://127.0.0.1:4222"),
            Self::ContainerType => Some("WORKER_AND_APP"),
            Self::TriggerDefaultPollInterval => Some("5"),
            Self::TriggerFailuresThreshold => Some("576"),
            Self::TriggerTimeoutSeconds => Some("60"),
            Self::FlowWorkerConcurrency => Some("10"),
            Self::QueuePollIntervalMs => Some("250"),
            Self::LogLevel => Some("info"),
            Self::LogPretty => Some("false"),
            Self::Environment => Some("prod"),
        }
    }
}

impl fmt::Display for SystemProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
