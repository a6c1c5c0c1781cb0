//! Error types for configuration resolution.

use std::fmt;

/// Errors from reading process configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required property has no value and no default.
    PropertyNotDefined { env_name: String },
    /// A property is set but cannot be interpreted.
    InvalidValue {
        env_name: String,
        value: String,
        expected: &'static str,
    },
    /// The configuration sources could not be loaded.
    LoadFailed { reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PropertyNotDefined { env_name } => {
                write!(
                    f,
                    "system property {env_name} is not defined, please check the documentation"
                )
            }
            Self::InvalidValue {
                env_name,
                value,
                expected,
            } => {
                write!(f, "invalid value '{value}' for {env_name}, expected {expected}")
            }
            Self::LoadFailed { reason } => write!(f, "failed to load configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_defined_names_the_variable() {
        let err = ConfigError::PropertyNotDefined {
            env_name: "AUTOFLOW_EDITION".to_string(),
        };
        assert!(err.to_string().contains("AUTOFLOW_EDITION"));
    }
}
