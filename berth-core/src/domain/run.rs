//! Run execution enums
//!
//! Status and error vocabulary shared by events, results, and front-ends.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a run executes: inside the container engine, or as a host-side mock
/// used when no engine is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Container,
    Host,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Container => "container",
            RunMode::Host => "host",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle transition reported while a run progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    Building,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

/// Terminal outcome of a run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcomeStatus {
    Succeeded,
    Failed,
}

/// Machine-readable failure code carried by error events and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    IoError,
    InvalidJson,
    ValidationFailed,
    PortAllocFailed,
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::IoError => "IO_ERROR",
            ErrorCode::InvalidJson => "INVALID_JSON",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::PortAllocFailed => "PORT_ALLOC_FAILED",
            ErrorCode::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}
