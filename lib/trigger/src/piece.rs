//! Piece trigger metadata and the collaborators that supply it.

use crate::error::TriggerError;
use async_trait::async_trait;
use autoflow_core::{FlowId, ProjectId};
use autoflow_flow::PieceTriggerSettings;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// How a webhook subscription is kept alive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookRenewConfiguration {
    /// Renew on a cron schedule.
    #[serde(rename_all = "camelCase")]
    Cron { cron_expression: String },
}

/// How a piece trigger learns about new events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerStrategy {
    /// The app pushes events to a shared, app-level endpoint.
    AppWebhook,
    /// The app calls a per-flow webhook, optionally renewed periodically.
    Webhook {
        #[serde(
            rename = "renewConfiguration",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        renew: Option<WebhookRenewConfiguration>,
    },
    /// The trigger is polled on a schedule.
    Polling,
}

/// Metadata of a trigger published by a piece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceTrigger {
    pub name: String,
    pub display_name: String,
    pub strategy: TriggerStrategy,
}

/// Looks up trigger metadata from the piece registry.
#[async_trait]
pub trait PieceMetadataLookup: Send + Sync {
    /// Returns the trigger metadata, or `None` if the piece or trigger is unknown.
    async fn get_piece_trigger(
        &self,
        settings: &PieceTriggerSettings,
        project_id: ProjectId,
    ) -> Result<Option<PieceTrigger>, Report<TriggerError>>;
}

/// Resolves the public URL third parties should call for a flow.
#[async_trait]
pub trait WebhookUrlResolver: Send + Sync {
    /// `simulate` selects the test endpoint used while building a flow.
    async fn webhook_url(
        &self,
        flow_id: FlowId,
        simulate: bool,
    ) -> Result<String, Report<TriggerError>>;
}
