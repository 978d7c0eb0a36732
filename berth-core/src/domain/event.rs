//! Typed run events
//!
//! Every event carries the run identity (task, run, mode) plus a payload
//! tagged with `type` on the wire. Payload fields serialize camelCase so
//! UI listeners can consume events without translation.

use serde::{Deserialize, Serialize};

use super::ports::PortBinding;
use super::run::{ErrorCode, LifecycleStatus, RunMode, RunOutcomeStatus};

/// One published port as reported to listeners, including a ready-to-open
/// preview URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPort {
    pub service: String,
    pub protocol: String,
    pub container: u16,
    pub host: u16,
    pub url: String,
}

impl From<&PortBinding> for PublishedPort {
    fn from(binding: &PortBinding) -> Self {
        Self {
            service: binding.service.clone(),
            protocol: binding.protocol.clone(),
            container: binding.container,
            host: binding.host,
            url: binding.url(),
        }
    }
}

/// Event payload, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEventPayload {
    #[serde(rename_all = "camelCase")]
    Lifecycle {
        status: LifecycleStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        container_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Ports {
        preview_service: String,
        ports: Vec<PublishedPort>,
    },
    #[serde(rename_all = "camelCase")]
    Error { code: ErrorCode, message: String },
    #[serde(rename_all = "camelCase")]
    Result { status: RunOutcomeStatus },
}

/// A single run event as delivered to bus listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Milliseconds since the Unix epoch.
    pub ts: i64,
    pub task_id: String,
    pub run_id: String,
    pub mode: RunMode,
    #[serde(flatten)]
    pub payload: RunEventPayload,
}

impl RunEvent {
    /// Stamps a payload with the run identity and the current wall clock.
    pub fn now(
        task_id: impl Into<String>,
        run_id: impl Into<String>,
        mode: RunMode,
        payload: RunEventPayload,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp_millis(),
            task_id: task_id.into(),
            run_id: run_id.into(),
            mode,
            payload,
        }
    }

    pub fn is_lifecycle(&self, status: LifecycleStatus) -> bool {
        matches!(&self.payload, RunEventPayload::Lifecycle { status: s, .. } if *s == status)
    }

    pub fn is_error(&self) -> bool {
        matches!(&self.payload, RunEventPayload::Error { .. })
    }
}
