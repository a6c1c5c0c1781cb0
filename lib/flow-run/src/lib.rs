//! Flow run side effects for autoflow.
//!
//! [`FlowRunSideEffects`] turns run status changes into queue jobs,
//! finish notifications and cross-instance broadcasts.

pub mod collaborators;
pub mod error;
pub mod event;
pub mod side_effects;

pub use collaborators::{FlowRunHooks, IssueTracker, RunNotifier};
pub use error::SideEffectsError;
pub use event::{FLOW_RUN_FINISHED_CHANNEL, RunFinished};
pub use side_effects::{FlowRunSideEffects, StartParams, resume_delay};
