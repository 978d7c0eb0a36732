//! Resolved run configuration
//!
//! The shape of a per-task configuration after loading, defaulting, and
//! validation. Front-ends and the lifecycle driver consume these types
//! read-only; only the config resolver constructs them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Relative path of the per-task configuration file under the task root.
pub const CONFIG_RELATIVE_PATH: &str = ".berth/config.json";

/// Only supported configuration schema version.
pub const CONFIG_VERSION: i64 = 1;

/// Default working directory, relative to the task root.
pub const DEFAULT_WORKDIR: &str = ".";

/// Service name used when a configuration declares no ports.
pub const DEFAULT_PREVIEW_SERVICE: &str = "app";

/// Package manager used to install dependencies and start the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl PackageManager {
    /// Stable lowercase name, matching the on-disk config value.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Pnpm => "pnpm",
            PackageManager::Yarn => "yarn",
            PackageManager::Bun => "bun",
        }
    }

    /// Parses a raw config value, tolerating case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "npm" => Some(PackageManager::Npm),
            "pnpm" => Some(PackageManager::Pnpm),
            "yarn" => Some(PackageManager::Yarn),
            "bun" => Some(PackageManager::Bun),
            _ => None,
        }
    }

    /// Default dev start command when the config does not declare one.
    pub fn default_start_command(&self) -> &'static str {
        match self {
            PackageManager::Bun => "bun run dev",
            _ => "npm run dev",
        }
    }
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single declared service port.
///
/// `service` names are unique within a config; the resolver enforces that
/// at most one entry carries `preview = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRequest {
    pub service: String,
    pub container: u16,
    pub protocol: String,
    pub preview: bool,
}

impl PortRequest {
    /// A plain TCP request without a preview flag.
    pub fn tcp(service: impl Into<String>, container: u16) -> Self {
        Self {
            service: service.into(),
            container,
            protocol: "tcp".to_string(),
            preview: false,
        }
    }
}

/// Fully resolved per-task run configuration.
///
/// Structure shared between the config resolver (constructs) and the
/// lifecycle driver (consumes). Invariant: exactly one entry in `ports`
/// has `preview = true` once resolution completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    pub version: i64,
    pub package_manager: PackageManager,
    pub start: String,
    pub env_file: Option<String>,
    pub workdir: String,
    pub ports: Vec<PortRequest>,
}

impl RunConfig {
    /// The port entry used when a config declares none: the conventional
    /// dev server on container port 3000, flagged as the preview.
    pub fn default_port() -> PortRequest {
        PortRequest {
            service: DEFAULT_PREVIEW_SERVICE.to_string(),
            container: 3000,
            protocol: "tcp".to_string(),
            preview: true,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            package_manager: PackageManager::Npm,
            start: PackageManager::Npm.default_start_command().to_string(),
            env_file: None,
            workdir: DEFAULT_WORKDIR.to_string(),
            ports: vec![Self::default_port()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_manager_parse() {
        assert_eq!(PackageManager::parse(" NPM "), Some(PackageManager::Npm));
        assert_eq!(PackageManager::parse("bun"), Some(PackageManager::Bun));
        assert_eq!(PackageManager::parse("cargo"), None);
    }

    #[test]
    fn test_default_start_command_depends_on_package_manager() {
        assert_eq!(PackageManager::Bun.default_start_command(), "bun run dev");
        assert_eq!(PackageManager::Pnpm.default_start_command(), "npm run dev");
    }

    #[test]
    fn test_default_config_has_single_preview_port() {
        let config = RunConfig::default();
        assert_eq!(config.ports.len(), 1);
        assert!(config.ports[0].preview);
        assert_eq!(config.ports[0].service, DEFAULT_PREVIEW_SERVICE);
    }

    #[test]
    fn test_config_serializes_camel_case() {
        let json = serde_json::to_value(RunConfig::default()).unwrap();
        assert_eq!(json["packageManager"], "npm");
        assert_eq!(json["workdir"], ".");
        assert_eq!(json["ports"][0]["container"], 3000);
    }
}
