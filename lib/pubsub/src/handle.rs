//! Process-scoped, lazily connected broadcaster.
//!
//! The first caller of [`PubSubHandle::get`] builds the backend; concurrent
//! first callers wait on the same construction. A failed construction is not
//! stored, so the next caller tries again.

use crate::error::PubSubError;
use crate::memory::MemoryPubSub;
use crate::nats::NatsPubSub;
use crate::pubsub::PubSub;
use async_trait::async_trait;
use autoflow_config::{ConfigResolver, QueueMode, SystemProp};
use rootcause::prelude::Report;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Builds a broadcaster backend.
#[async_trait]
pub trait PubSubConnector: Send + Sync {
    /// Creates a connected backend.
    async fn connect(&self) -> Result<Arc<dyn PubSub>, Report<PubSubError>>;
}

/// Picks the backend from the configured queue mode.
#[derive(Debug, Clone)]
pub struct QueueModeConnector {
    mode: QueueMode,
    nats_url: String,
}

impl QueueModeConnector {
    /// Creates a connector for an explicit mode.
    #[must_use]
    pub fn new(mode: QueueMode, nats_url: impl Into<String>) -> Self {
        Self {
            mode,
            nats_url: nats_url.into(),
        }
    }

    /// Reads `QUEUE_MODE` and `NATS_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if either property is missing or invalid.
    pub fn from_config(config: &ConfigResolver) -> Result<Self, Report<PubSubError>> {
        let mode = config
            .queue_mode()
            .map_err(|report| report.context(PubSubError::Configuration))?;
        let nats_url = config
            .get_or_throw(SystemProp::NatsUrl)
            .map_err(|report| report.context(PubSubError::Configuration))?;
        Ok(Self::new(mode, nats_url))
    }
}

#[async_trait]
impl PubSubConnector for QueueModeConnector {
    async fn connect(&self) -> Result<Arc<dyn PubSub>, Report<PubSubError>> {
        match self.mode {
            QueueMode::Memory => Ok(Arc::new(MemoryPubSub::new())),
            QueueMode::Nats => Ok(Arc::new(NatsPubSub::connect(&self.nats_url).await?)),
        }
    }
}

/// Lazily connected, shared broadcaster.
pub struct PubSubHandle {
    connector: Arc<dyn PubSubConnector>,
    cell: OnceCell<Arc<dyn PubSub>>,
}

impl PubSubHandle {
    /// Creates an unconnected handle.
    #[must_use]
    pub fn new(connector: Arc<dyn PubSubConnector>) -> Self {
        Self {
            connector,
            cell: OnceCell::new(),
        }
    }

    /// Creates a handle whose backend follows `QUEUE_MODE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue mode or NATS URL cannot be resolved.
    pub fn from_config(config: &ConfigResolver) -> Result<Self, Report<PubSubError>> {
        Ok(Self::new(Arc::new(QueueModeConnector::from_config(config)?)))
    }

    /// Returns the backend, connecting on first use.
    ///
    /// # Errors
    ///
    /// Returns the connection error; a later call retries.
    pub async fn get(&self) -> Result<Arc<dyn PubSub>, Report<PubSubError>> {
        let pubsub = self
            .cell
            .get_or_try_init(|| async {
                debug!("connecting pub/sub backend");
                self.connector.connect().await
            })
            .await?;
        Ok(Arc::clone(pubsub))
    }

    /// Whether a backend has been connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.cell.initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingConnector {
        attempts: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl PubSubConnector for CountingConnector {
        async fn connect(&self) -> Result<Arc<dyn PubSub>, Report<PubSubError>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.fail_first && attempt == 0 {
                return Err(PubSubError::ConnectionFailed {
                    reason: "broker down".to_string(),
                }
                .into());
            }
            Ok(Arc::new(MemoryPubSub::new()))
        }
    }

    #[tokio::test]
    async fn concurrent_first_access_connects_once() {
        let connector = Arc::new(CountingConnector::default());
        let handle = PubSubHandle::new(connector.clone());

        let (a, b) = tokio::join!(handle.get(), handle.get());
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn failed_connect_is_retried() {
        let connector = Arc::new(CountingConnector {
            fail_first: true,
            ..Default::default()
        });
        let handle = PubSubHandle::new(connector.clone());

        let Err(err) = handle.get().await else {
            panic!("expected connect failure");
        };
        assert!(err.to_string().contains("broker down"));
        assert!(!handle.is_connected());

        handle.get().await.unwrap();
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn memory_mode_from_config() {
        let config = ConfigResolver::from_overrides([(SystemProp::QueueMode, "MEMORY")]).unwrap();
        let handle = PubSubHandle::from_config(&config).unwrap();
        let pubsub = handle.get().await.unwrap();
        pubsub.publish("anything", "hello").await.unwrap();
    }
}
