//! Engine round trip for trigger hooks.

use crate::error::TriggerError;
use async_trait::async_trait;
use autoflow_core::{FlowId, ProjectId};
use autoflow_flow::FlowVersion;
use autoflow_queue::ScheduleOptions;
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};

/// Trigger lifecycle hook the engine should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerHookType {
    OnEnable,
    OnDisable,
}

/// A hook request sent to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    pub hook_type: TriggerHookType,
    pub flow_version: FlowVersion,
    pub webhook_url: String,
    pub project_id: ProjectId,
    /// Whether this is a simulation from the flow builder.
    pub test: bool,
}

/// Status of an engine response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineResponseStatus {
    Ok,
    Failed,
    Timeout,
    InternalError,
}

/// An app-level event subscription requested by an `APP_WEBHOOK` trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerListener {
    pub events: Vec<String>,
    pub identifier_value: String,
}

/// What the engine reported after enabling a trigger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEnableResult {
    #[serde(default)]
    pub listeners: Vec<TriggerListener>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_options: Option<ScheduleOptions>,
}

/// Engine response to a trigger hook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineResponse {
    pub status: EngineResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TriggerEnableResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_error: Option<String>,
}

impl EngineResponse {
    /// A successful response carrying `result`.
    #[must_use]
    pub fn ok(result: TriggerEnableResult) -> Self {
        Self {
            status: EngineResponseStatus::Ok,
            result: Some(result),
            standard_error: None,
        }
    }

    /// The response reported when the engine does not answer in time.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            status: EngineResponseStatus::Timeout,
            result: None,
            standard_error: Some("trigger hook timed out".to_string()),
        }
    }

    /// Whether the engine reported success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == EngineResponseStatus::Ok
    }
}

/// Runs trigger hooks in the execution engine.
#[async_trait]
pub trait TriggerEngine: Send + Sync {
    /// Sends a hook request and waits for the engine's answer.
    ///
    /// Transport failures are errors; engine-side failures are responses
    /// with a non-OK status.
    async fn execute_trigger_hook(
        &self,
        request: EngineRequest,
    ) -> Result<EngineResponse, Report<TriggerError>>;
}

/// Registration of an app event listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEventListener {
    pub project_id: ProjectId,
    pub flow_id: FlowId,
    /// The piece name.
    pub app_name: String,
    pub events: Vec<String>,
    pub identifier_value: String,
}

/// Routes inbound app-level events to the flows listening for them.
#[async_trait]
pub trait AppEventRouting: Send + Sync {
    /// Registers one listener.
    async fn create_listener(&self, listener: AppEventListener) -> Result<(), Report<TriggerError>>;

    /// Removes every listener of a flow.
    async fn delete_listeners(
        &self,
        project_id: ProjectId,
        flow_id: FlowId,
    ) -> Result<(), Report<TriggerError>>;
}
