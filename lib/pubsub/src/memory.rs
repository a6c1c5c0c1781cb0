//! In-process broadcaster using tokio broadcast channels.

use crate::error::PubSubError;
use crate::pubsub::{MessageHandler, PubSub, Subscription};
use async_trait::async_trait;
use rootcause::prelude::Report;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};

const BROADCAST_CAPACITY: usize = 1000;

/// Broadcaster backed by per-channel `tokio::sync::broadcast` channels.
#[derive(Default)]
pub struct MemoryPubSub {
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryPubSub {
    /// Creates a broadcaster with no channels.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, channel: &str, message: &str) -> Result<(), Report<PubSubError>> {
        let delivered = {
            let channels = self.channels.read().await;
            match channels.get(channel) {
                Some(tx) => tx.send(message.to_string()).is_ok(),
                None => return Ok(()),
            }
        };
        // No receivers left is not an error, but the sender is dropped.
        if !delivered {
            let mut channels = self.channels.write().await;
            if channels
                .get(channel)
                .is_some_and(|tx| tx.receiver_count() == 0)
            {
                channels.remove(channel);
                debug!(channel, "dropped channel without subscribers");
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Subscription, Report<PubSubError>> {
        let mut rx = {
            let mut channels = self.channels.write().await;
            channels.retain(|_, tx| tx.receiver_count() > 0);
            channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
                .subscribe()
        };

        let name = channel.to_string();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => handler.on_message(&name, &message).await,
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %name, skipped, "subscriber lagged, messages dropped");
                    }
                }
            }
        });

        Ok(Subscription::new(channel, forwarder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct ChannelHandler(mpsc::UnboundedSender<(String, String)>);

    #[async_trait]
    impl MessageHandler for ChannelHandler {
        async fn on_message(&self, channel: &str, message: &str) {
            let _ = self.0.send((channel.to_string(), message.to_string()));
        }
    }

    fn handler() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelHandler(tx)), rx)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("message in time")
            .expect("handler alive")
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let pubsub = MemoryPubSub::new();
        let (first, mut first_rx) = handler();
        let (second, mut second_rx) = handler();
        let _a = pubsub.subscribe("runs", first).await.unwrap();
        let _b = pubsub.subscribe("runs", second).await.unwrap();

        pubsub.publish("runs", "finished").await.unwrap();

        assert_eq!(recv(&mut first_rx).await, ("runs".to_string(), "finished".to_string()));
        assert_eq!(recv(&mut second_rx).await.1, "finished");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let pubsub = MemoryPubSub::new();
        let (h, mut rx) = handler();
        let _sub = pubsub.subscribe("a", h).await.unwrap();

        pubsub.publish("b", "ignored").await.unwrap();
        pubsub.publish("a", "kept").await.unwrap();

        assert_eq!(recv(&mut rx).await.1, "kept");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let pubsub = MemoryPubSub::new();
        pubsub.publish("nobody", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let pubsub = MemoryPubSub::new();
        let (h, mut rx) = handler();
        let sub = pubsub.subscribe("runs", h).await.unwrap();
        assert_eq!(sub.channel(), "runs");
        sub.unsubscribe();

        pubsub.publish("runs", "late").await.unwrap();
        let late = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(!matches!(late, Ok(Some(_))));
    }

    #[tokio::test]
    async fn channels_without_subscribers_are_dropped() {
        let pubsub = MemoryPubSub::new();
        let (h, _rx) = handler();
        pubsub.subscribe("runs", h).await.unwrap().unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;

        pubsub.publish("runs", "nobody listening").await.unwrap();

        assert!(pubsub.channels.read().await.is_empty());
    }

    #[tokio::test]
    async fn subscribing_prunes_abandoned_channels() {
        let pubsub = MemoryPubSub::new();
        let (first, _first_rx) = handler();
        pubsub.subscribe("old", first).await.unwrap().unsubscribe();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (second, _second_rx) = handler();
        let _sub = pubsub.subscribe("new", second).await.unwrap();

        let channels = pubsub.channels.read().await;
        assert_eq!(channels.len(), 1);
        assert!(channels.contains_key("new"));
    }
}
