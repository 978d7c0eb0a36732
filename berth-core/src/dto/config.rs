//! Config resolver DTOs

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::config::RunConfig;
use crate::domain::run::ErrorCode;

/// Typed failure raised while loading or validating a task configuration.
///
/// `config_key` points at the offending field (e.g. `ports[1].container`)
/// for validation failures; `config_path` names the file involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigLoadError {
    pub code: ErrorCode,
    pub message: String,
    pub config_path: Option<String>,
    pub config_key: Option<String>,
}

impl fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ConfigLoadError {}

/// A successfully loaded configuration.
///
/// `source_path` is `None` when the task had no config file and defaults
/// were applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedConfig {
    pub config: RunConfig,
    pub source_path: Option<String>,
}
