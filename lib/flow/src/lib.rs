//! Flow domain model consumed by the scheduling engine.
//!
//! - **Versions**: a flow version and the trigger it starts from
//! - **Runs**: flow run status machine and pause metadata

pub mod run;
pub mod version;

pub use run::{
    ExecutionType, FlowRun, FlowRunStatus, HookType, PauseMetadata, RunEnvironment,
};
pub use version::{FlowTrigger, FlowVersion, PieceTriggerSettings, TriggerType};
