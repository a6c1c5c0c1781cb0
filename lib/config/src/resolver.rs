//! Typed, read-only access to process configuration.
//!
//! Values come from `AUTOFLOW_*` environment variables layered over the static
//! default table in [`SystemProp::default_value`]. The resolver is built once
//! at startup and shared by reference afterwards.

use crate::error::ConfigError;
use crate::prop::{ENV_PREFIX, SystemProp};
use rootcause::prelude::Report;
use std::fmt;
use std::str::FromStr;

/// Deployment edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edition {
    /// Metered, multi-tenant hosted deployment.
    Cloud,
    /// Self-hosted community deployment.
    Community,
    /// Self-hosted enterprise deployment.
    Enterprise,
}

/// Backend used by the job queue and pub/sub broadcaster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Single-process, non-durable.
    Memory,
    /// NATS JetStream, shared by every process.
    Nats,
}

/// The role this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Executes jobs only.
    Worker,
    /// Serves the application only.
    App,
    /// Both.
    WorkerAndApp,
}

macro_rules! upper_case_enum {
    ($name:ident, $expected:expr, { $($text:expr => $variant:ident),+ $(,)? }) => {
        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(()),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($text),)+
                }
            }
        }

        impl $name {
            const EXPECTED: &'static str = $expected;
        }
    };
}

upper_case_enum!(Edition, "one of CLOUD, COMMUNITY, ENTERPRISE", {
    "CLOUD" => Cloud,
    "COMMUNITY" => Community,
    "ENTERPRISE" => Enterprise,
});

upper_case_enum!(QueueMode, "one of MEMORY, NATS", {
    "MEMORY" => Memory,
    "NATS" => Nats,
});

upper_case_enum!(ContainerType, "one of WORKER, APP, WORKER_AND_APP", {
    "WORKER" => Worker,
    "APP" => App,
    "WORKER_AND_APP" => WorkerAndApp,
});

/// Resolves [`SystemProp`] values.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    inner: config::Config,
}

impl ConfigResolver {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration sources cannot be read.
    pub fn from_env() -> Result<Self, Report<ConfigError>> {
        Self::build(None, true)
    }

    /// Builds a resolver from explicit overrides layered over the defaults.
    ///
    /// The process environment is ignored, which makes this suitable for
    /// embedding and tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be assembled.
    pub fn from_overrides<I, V>(overrides: I) -> Result<Self, Report<ConfigError>>
    where
        I: IntoIterator<Item = (SystemProp, V)>,
        V: Into<String>,
    {
        let mut map = config::Map::new();
        for (prop, value) in overrides {
            map.insert(prop.env_name(), value.into());
        }
        Self::build(Some(map), true)
    }

    fn build(
        env_source: Option<config::Map<String, String>>,
        include_defaults: bool,
    ) -> Result<Self, Report<ConfigError>> {
        let mut builder = config::Config::builder();

        if include_defaults {
            for prop in SystemProp::ALL {
                if let Some(default) = prop.default_value() {
                    builder = builder.set_default(prop.key(), default).map_err(|e| {
                        ConfigError::LoadFailed {
                            reason: e.to_string(),
                        }
                    })?;
                }
            }
        }

        let inner = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).source(env_source))
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                reason: e.to_string(),
            })?;

        Ok(Self { inner })
    }

    /// Returns the raw string value, if set or defaulted.
    #[must_use]
    pub fn get(&self, prop: SystemProp) -> Option<String> {
        self.inner.get_string(&prop.key()).ok()
    }

    /// Returns the value parsed as an integer.
    ///
    /// Unset and non-numeric values both yield `None`.
    #[must_use]
    pub fn get_number(&self, prop: SystemProp) -> Option<i64> {
        self.get(prop).and_then(|v| v.trim().parse().ok())
    }

    /// Returns `Some(true)` only for the literal `true`.
    #[must_use]
    pub fn get_boolean(&self, prop: SystemProp) -> Option<bool> {
        self.get(prop).map(|v| v == "true")
    }

    /// Returns a comma-separated value as trimmed entries, empty when unset.
    #[must_use]
    pub fn get_list(&self, prop: SystemProp) -> Vec<String> {
        self.get(prop)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default()
    }

    /// Returns the raw value or fails naming the missing variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PropertyNotDefined`] if the property is unset
    /// and has no default.
    pub fn get_or_throw(&self, prop: SystemProp) -> Result<String, Report<ConfigError>> {
        self.get(prop).ok_or_else(|| {
            ConfigError::PropertyNotDefined {
                env_name: prop.env_name(),
            }
            .into()
        })
    }

    /// Returns the numeric value or fails naming the missing variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PropertyNotDefined`] if the property is unset,
    /// has no default, or is not numeric.
    pub fn get_number_or_throw(&self, prop: SystemProp) -> Result<i64, Report<ConfigError>> {
        self.get_number(prop).ok_or_else(|| {
            ConfigError::PropertyNotDefined {
                env_name: prop.env_name(),
            }
            .into()
        })
    }

    fn get_parsed<T: FromStr>(
        &self,
        prop: SystemProp,
        expected: &'static str,
    ) -> Result<T, Report<ConfigError>> {
        let value = self.get_or_throw(prop)?;
        value.parse().map_err(|_| {
            ConfigError::InvalidValue {
                env_name: prop.env_name(),
                value,
                expected,
            }
            .into()
        })
    }

    /// The deployment edition.
    ///
    /// # Errors
    ///
    /// Returns an error if the edition is missing or unrecognized.
    pub fn edition(&self) -> Result<Edition, Report<ConfigError>> {
        self.get_parsed(SystemProp::Edition, Edition::EXPECTED)
    }

    /// The queue and pub/sub backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode is missing or unrecognized.
    pub fn queue_mode(&self) -> Result<QueueMode, Report<ConfigError>> {
        self.get_parsed(SystemProp::QueueMode, QueueMode::EXPECTED)
    }

    /// The role of this process.
    ///
    /// # Errors
    ///
    /// Returns an error if the container type is missing or unrecognized.
    pub fn container_type(&self) -> Result<ContainerType, Report<ConfigError>> {
        self.get_parsed(SystemProp::ContainerType, ContainerType::EXPECTED)
    }

    /// Whether this process executes jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the container type cannot be resolved.
    pub fn is_worker(&self) -> Result<bool, Report<ConfigError>> {
        Ok(matches!(
            self.container_type()?,
            ContainerType::Worker | ContainerType::WorkerAndApp
        ))
    }

    /// Whether this process serves the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the container type cannot be resolved.
    pub fn is_app(&self) -> Result<bool, Report<ConfigError>> {
        Ok(matches!(
            self.container_type()?,
            ContainerType::App | ContainerType::WorkerAndApp
        ))
    }
}
