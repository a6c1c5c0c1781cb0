//! Flow versions and the trigger they start from.
//!
//! Only the parts of a flow version that the scheduling engine reads are
//! modelled here; step definitions stay opaque to this crate.

use autoflow_core::{FlowId, FlowVersionId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Coarse trigger type of a flow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// No trigger configured yet.
    Empty,
    /// Trigger provided by a piece (plugin).
    Piece,
}

/// The trigger attached to a flow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowTrigger {
    /// Placeholder trigger; never scheduled.
    Empty,
    /// A piece-provided trigger.
    Piece(PieceTriggerSettings),
}

impl FlowTrigger {
    /// Returns the coarse trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Empty => TriggerType::Empty,
            Self::Piece(_) => TriggerType::Piece,
        }
    }
}

/// Which piece trigger a flow version uses, and its user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceTriggerSettings {
    /// Piece package name, e.g. `@autoflow/piece-gmail`.
    pub piece_name: String,
    /// Piece version constraint.
    pub piece_version: String,
    /// Trigger name within the piece.
    pub trigger_name: String,
    /// User-supplied trigger input.
    #[serde(default)]
    pub input: JsonValue,
}

/// An immutable flow version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVersion {
    /// Version identifier; also the id of any repeating job it owns.
    pub id: FlowVersionId,
    /// The flow this version belongs to.
    pub flow_id: FlowId,
    /// Human-readable name.
    pub display_name: String,
    /// Entry trigger.
    pub trigger: FlowTrigger,
}

impl FlowVersion {
    /// Creates a new version with a fresh id.
    #[must_use]
    pub fn new(flow_id: FlowId, display_name: impl Into<String>, trigger: FlowTrigger) -> Self {
        Self {
            id: FlowVersionId::new(),
            flow_id,
            display_name: display_name.into(),
            trigger,
        }
    }

    /// Returns the piece trigger settings, if the trigger is piece-based.
    #[must_use]
    pub fn piece_trigger(&self) -> Option<&PieceTriggerSettings> {
        match &self.trigger {
            FlowTrigger::Piece(settings) => Some(settings),
            FlowTrigger::Empty => None,
        }
    }
}
