//! Jobs and their schema-versioned payloads.

use autoflow_core::{FlowId, FlowRunId, FlowVersionId, ProjectId};
use autoflow_flow::{ExecutionType, HookType, RunEnvironment};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Schema version stamped on every job written by this build.
pub const LATEST_JOB_DATA_SCHEMA_VERSION: u32 = 1;

/// When a job delayed by `delay_ms` from `now` becomes eligible.
pub(crate) fn eligible_at(now: DateTime<Utc>, delay_ms: u64) -> DateTime<Utc> {
    chrono::Duration::from_std(std::time::Duration::from_millis(delay_ms))
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Job identifier and dedupe key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Creates a job id from any string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<FlowRunId> for JobId {
    fn from(id: FlowRunId) -> Self {
        Self(id.to_string())
    }
}

impl From<FlowVersionId> for JobId {
    fn from(id: FlowVersionId) -> Self {
        Self(id.to_string())
    }
}

/// Dispatch priority of one-time jobs. `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Someone is waiting synchronously on the result.
    High,
    /// Everything else.
    Medium,
}

impl Priority {
    /// Lowercase name, used in broker subjects.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
        }
    }
}

/// Recurrence of a repeating job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleOptions {
    /// 5-field Unix cron, or 6/7-field with seconds.
    pub cron_expression: String,
    /// `UTC`, a fixed offset such as `+02:00`, or an IANA zone name.
    pub timezone: String,
    /// Consecutive failed occurrences.
    pub failure_count: u32,
}

impl ScheduleOptions {
    /// UTC schedule with a clean failure counter.
    #[must_use]
    pub fn utc(cron_expression: impl Into<String>) -> Self {
        Self {
            cron_expression: cron_expression.into(),
            timezone: "UTC".to_string(),
            failure_count: 0,
        }
    }
}

/// How and when a job becomes eligible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Eligible immediately.
    OneTime { priority: Priority },
    /// Eligible after `delay_ms` elapses.
    Delayed {
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    /// Eligible at every cron occurrence until removed.
    Repeating {
        #[serde(rename = "scheduleOptions")]
        schedule_options: ScheduleOptions,
    },
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub data: JobData,
}

impl Job {
    /// A job eligible immediately at the given priority.
    #[must_use]
    pub fn one_time(id: impl Into<JobId>, priority: Priority, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::OneTime { priority },
            data: JobData::new(payload),
        }
    }

    /// A job eligible after `delay_ms` milliseconds.
    #[must_use]
    pub fn delayed(id: impl Into<JobId>, delay_ms: u64, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Delayed { delay_ms },
            data: JobData::new(payload),
        }
    }

    /// A job that fires on a cron schedule.
    #[must_use]
    pub fn repeating(
        id: impl Into<JobId>,
        schedule_options: ScheduleOptions,
        payload: JobPayload,
    ) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Repeating { schedule_options },
            data: JobData::new(payload),
        }
    }
}

/// Versioned job payload envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobData {
    pub schema_version: u32,
    pub payload: JobPayload,
}

impl JobData {
    /// Wraps a payload at the latest schema version.
    #[must_use]
    pub fn new(payload: JobPayload) -> Self {
        Self {
            schema_version: LATEST_JOB_DATA_SCHEMA_VERSION,
            payload,
        }
    }

    /// Serializes to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid job envelope.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Returns true if this build wrote (or can read) the payload unchanged.
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.schema_version == LATEST_JOB_DATA_SCHEMA_VERSION
    }
}

/// What a job asks the worker to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPayload {
    /// Begin or resume a flow run.
    Execution(ExecutionJobData),
    /// Recurring or resumption work tied to a flow version.
    Repeatable(RepeatableJobData),
}

/// Start or resume a flow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJobData {
    pub run_id: FlowRunId,
    pub flow_version_id: FlowVersionId,
    pub project_id: ProjectId,
    pub environment: RunEnvironment,
    pub execution_type: ExecutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronous_handler_id: Option<String>,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hook_type: Option<HookType>,
}

/// Repeatable job variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "jobType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatableJobData {
    /// Poll a trigger.
    #[serde(rename_all = "camelCase")]
    ExecuteTrigger {
        flow_id: FlowId,
        flow_version_id: FlowVersionId,
        project_id: ProjectId,
        environment: RunEnvironment,
    },
    /// Renew a webhook subscription with the third party.
    #[serde(rename_all = "camelCase")]
    RenewWebhook {
        flow_id: FlowId,
        flow_version_id: FlowVersionId,
        project_id: ProjectId,
        environment: RunEnvironment,
    },
    /// Resume a run paused on a delay.
    #[serde(rename_all = "camelCase")]
    DelayedFlow {
        run_id: FlowRunId,
        flow_version_id: FlowVersionId,
        project_id: ProjectId,
        environment: RunEnvironment,
    },
}

impl RepeatableJobData {
    /// The flow version this job acts on.
    #[must_use]
    pub fn flow_version_id(&self) -> FlowVersionId {
        match self {
            Self::ExecuteTrigger {
                flow_version_id, ..
            }
            | Self::RenewWebhook {
                flow_version_id, ..
            }
            | Self::DelayedFlow {
                flow_version_id, ..
            } => *flow_version_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute_trigger() -> JobPayload {
        JobPayload::Repeatable(RepeatableJobData::ExecuteTrigger {
            flow_id: FlowId::new(),
            flow_version_id: FlowVersionId::new(),
            project_id: ProjectId::new(),
            environment: RunEnvironment::Production,
        })
    }

    #[test]
    fn high_priority_sorts_first() {
        assert!(Priority::High < Priority::Medium);
    }

    #[test]
    fn new_data_is_latest_schema() {
        let data = JobData::new(execute_trigger());
        assert_eq!(data.schema_version, LATEST_JOB_DATA_SCHEMA_VERSION);
        assert!(data.is_latest());
    }

    #[test]
    fn job_id_from_flow_version_uses_prefixed_form() {
        let version = FlowVersionId::new();
        let id = JobId::from(version);
        assert_eq!(id.as_str(), version.to_string());
        assert!(id.as_str().starts_with("fv_"));
    }

    #[test]
    fn repeatable_payload_wire_shape() {
        let data = JobData::new(execute_trigger());
        let json: serde_json::Value =
            serde_json::from_slice(&data.to_json_bytes().expect("encode")).expect("json");
        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["payload"]["kind"], "REPEATABLE");
        assert_eq!(json["payload"]["jobType"], "EXECUTE_TRIGGER");
        assert_eq!(json["payload"]["environment"], "PRODUCTION");
    }

    #[test]
    fn delayed_kind_wire_shape() {
        let json = serde_json::to_value(JobKind::Delayed { delay_ms: 1500 }).expect("encode");
        assert_eq!(json["type"], "DELAYED");
        assert_eq!(json["delayMs"], 1500);
    }

    #[test]
    fn flow_version_of_repeatable() {
        let version = FlowVersionId::new();
        let data = RepeatableJobData::DelayedFlow {
            run_id: FlowRunId::new(),
            flow_version_id: version,
            project_id: ProjectId::new(),
            environment: RunEnvironment::Testing,
        };
        assert_eq!(data.flow_version_id(), version);
    }
}
