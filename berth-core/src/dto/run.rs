//! Run registry DTOs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::config::RunConfig;
use crate::domain::ports::PortBinding;
use crate::domain::run::{ErrorCode, RunMode};
use crate::dto::config::ConfigLoadError;

/// Arguments for starting a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub task_id: String,
    pub task_path: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub mode: Option<RunMode>,
}

impl StartRunRequest {
    pub fn new(task_id: impl Into<String>, task_path: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            task_path: task_path.into(),
            run_id: None,
            mode: None,
        }
    }
}

/// Terminal failure of a `start` call.
///
/// Carries the same code/message as the `error` event emitted on the bus
/// for the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub code: ErrorCode,
    pub message: String,
    pub config_path: Option<String>,
    pub config_key: Option<String>,
}

impl RunFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            config_path: None,
            config_key: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn port_alloc_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PortAllocFailed, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn with_config_path(mut self, path: impl Into<String>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_config_key(mut self, key: impl Into<String>) -> Self {
        self.config_key = Some(key.into());
        self
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RunFailure {}

impl From<ConfigLoadError> for RunFailure {
    fn from(err: ConfigLoadError) -> Self {
        Self {
            code: err.code,
            message: err.message,
            config_path: err.config_path,
            config_key: err.config_key,
        }
    }
}

/// Successful outcome of a `start` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedRun {
    pub run_id: String,
    pub config: RunConfig,
    /// Path of the config file the run was resolved from; `None` when the
    /// task had no config file and defaults were used.
    pub source_path: Option<String>,
}

/// Read-only report of a task's current engine-side state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub running: bool,
    pub ports: Vec<PortBinding>,
    pub preview_service: Option<String>,
}
