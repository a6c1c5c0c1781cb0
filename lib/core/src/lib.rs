//! Core identifiers and error handling shared by every autoflow crate.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{FlowId, FlowRunId, FlowVersionId, ParseIdError, ProjectId};
