//! Configuration for autoflow processes.
//!
//! This crate provides:
//!
//! - **System properties**: the logical keys and their static defaults
//! - **Resolver**: typed getters over environment overrides and defaults
//! - **Logging**: one-time tracing subscriber setup driven by the resolver

pub mod error;
pub mod logging;
pub mod prop;
pub mod resolver;

pub use error::ConfigError;
pub use prop::SystemProp;
pub use resolver::{ConfigResolver, ContainerType, Edition, QueueMode};
