//! Core NATS broadcaster.
//!
//! Publishing and subscribing use two separate connections, so a slow
//! subscriber never back-pressures publishers sharing the process.

use crate::error::PubSubError;
use crate::pubsub::{MessageHandler, PubSub, Subscription};
use async_trait::async_trait;
use futures::StreamExt;
use rootcause::prelude::Report;
use std::sync::Arc;
use tracing::{info, warn};

/// Subject prefix for pub/sub channels.
const PUBSUB_SUBJECT_PREFIX: &str = "autoflow.pubsub";

fn subject(channel: &str) -> String {
    format!("{PUBSUB_SUBJECT_PREFIX}.{channel}")
}

/// Broadcaster over core NATS subjects `autoflow.pubsub.<channel>`.
pub struct NatsPubSub {
    publisher: async_nats::Client,
    subscriber: async_nats::Client,
}

impl NatsPubSub {
    /// Opens the publish and subscribe connections.
    ///
    /// # Errors
    ///
    /// Returns an error if either connection fails.
    pub async fn connect(url: &str) -> Result<Self, Report<PubSubError>> {
        let connect = || async {
            async_nats::connect(url)
                .await
                .map_err(|e| PubSubError::ConnectionFailed {
                    reason: e.to_string(),
                })
        };
        let publisher = connect().await?;
        let subscriber = connect().await?;
        info!(url, "connected NATS pub/sub");
        Ok(Self {
            publisher,
            subscriber,
        })
    }
}

#[async_trait]
impl PubSub for NatsPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), Report<PubSubError>> {
        self.publisher
            .publish(subject(channel), message.to_string().into())
            .await
            .map_err(|e| PubSubError::PublishFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Report<PubSubError>> {
        let mut messages = self.subscriber.subscribe(subject(channel)).await.map_err(|e| {
            PubSubError::SubscribeFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            }
        })?;

        let name = channel.to_string();
        // Dropping the subscriber stream on abort unsubscribes from the server.
        let forwarder = tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                match std::str::from_utf8(&message.payload) {
                    Ok(text) => handler.on_message(&name, text).await,
                    Err(e) => warn!(channel = %name, error = %e, "dropping non-UTF-8 message"),
                }
            }
        });

        Ok(Subscription::new(channel, forwarder))
    }
}
