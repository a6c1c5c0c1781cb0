//! Error types for the pub/sub crate.

use std::fmt;

/// Errors from pub/sub operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubError {
    /// The broker could not be reached.
    ConnectionFailed { reason: String },
    /// A message could not be published.
    PublishFailed { channel: String, reason: String },
    /// A subscription could not be opened.
    SubscribeFailed { channel: String, reason: String },
    /// The backend could not be chosen from configuration.
    Configuration,
}

impl fmt::Display for PubSubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { reason } => write!(f, "pub/sub connection failed: {reason}"),
            Self::PublishFailed { channel, reason } => {
                write!(f, "failed to publish on {channel}: {reason}")
            }
            Self::SubscribeFailed { channel, reason } => {
                write!(f, "failed to subscribe to {channel}: {reason}")
            }
            Self::Configuration => write!(f, "pub/sub backend is not configured"),
        }
    }
}

impl std::error::Error for PubSubError {}
