//! Trigger lifecycle for autoflow.
//!
//! This crate provides:
//!
//! - **Activation**: [`TriggerActivator`] runs the engine's enable hook and
//!   installs listeners or schedules according to the trigger strategy
//! - **Deactivation**: [`TriggerDeactivator`] removes schedules and app event
//!   listeners, and disables schedules after too many consecutive failures
//! - **Polling policy**: how often polling triggers run
//!
//! Piece metadata, webhook URLs, the engine and app event routing are
//! external services reached through the traits in [`piece`] and [`engine`].

pub mod activator;
pub mod deactivator;
pub mod engine;
pub mod error;
pub mod piece;
pub mod polling;

pub use activator::{EnableTriggerParams, TriggerActivator, TriggerCollaborators};
pub use deactivator::{DEFAULT_FAILURES_THRESHOLD, DisableTriggerParams, TriggerDeactivator};
pub use engine::{
    AppEventListener, AppEventRouting, EngineRequest, EngineResponse, EngineResponseStatus,
    TriggerEnableResult, TriggerEngine, TriggerHookType, TriggerListener,
};
pub use error::TriggerError;
pub use piece::{
    PieceMetadataLookup, PieceTrigger, TriggerStrategy, WebhookRenewConfiguration,
    WebhookUrlResolver,
};
#[cfg(feature = "metered")]
pub use polling::{PlanLimits, PlanMinimumPollingInterval, ProjectPlan};
pub use polling::{
    ConfiguredPollingInterval, DEFAULT_POLLING_INTERVAL_MINUTES, PollingIntervalPolicy,
    every_x_minutes_cron,
};
