//! The broadcaster contract.

use crate::error::PubSubError;
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Receives messages published on a subscribed channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called once per message, in publish order for a given publisher.
    async fn on_message(&self, channel: &str, message: &str);
}

/// Fan-out messaging between processes. Nothing is persisted: only
/// subscribers present at publish time receive a message.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publishes a message to every current subscriber of `channel`.
    async fn publish(&self, channel: &str, message: &str) -> Result<(), Report<PubSubError>>;

    /// Delivers every later message on `channel` to `handler`.
    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Report<PubSubError>>;
}

/// A live subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub(crate) fn new(channel: impl Into<String>, forwarder: JoinHandle<()>) -> Self {
        Self {
            channel: channel.into(),
            forwarder: Some(forwarder),
        }
    }

    /// The subscribed channel.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Stops delivery to the handler.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            debug!(channel = %self.channel, "unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
