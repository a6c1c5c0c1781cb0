//! Pub/sub broadcaster for autoflow.
//!
//! Used for cross-process signals such as "this flow run finished". Two
//! backends implement [`PubSub`]: an in-process one for `MEMORY` queue mode
//! and a NATS one for everything else. [`PubSubHandle`] connects lazily.

pub mod error;
pub mod handle;
pub mod memory;
pub mod nats;
pub mod pubsub;

pub use error::PubSubError;
pub use handle::{PubSubConnector, PubSubHandle, QueueModeConnector};
pub use memory::MemoryPubSub;
pub use nats::NatsPubSub;
pub use pubsub::{MessageHandler, PubSub, Subscription};
