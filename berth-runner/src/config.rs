//! Task configuration resolver
//!
//! Loads `.berth/config.json` from a task checkout, applies defaults, and
//! validates every field. A missing file is not an error: defaults apply
//! and the source path is reported as `None`. Validation failures carry
//! the offending key path so a UI can point at the broken field.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use berth_core::domain::config::{
    CONFIG_RELATIVE_PATH, CONFIG_VERSION, DEFAULT_WORKDIR, PackageManager, PortRequest, RunConfig,
};
use berth_core::domain::run::ErrorCode;
use berth_core::dto::config::{ConfigLoadError, LoadedConfig};

/// Lockfile names checked during package manager inference, in priority
/// order. Bun lockfiles win over pnpm/yarn/npm because a repo migrating to
/// bun typically keeps stale npm artifacts around.
const LOCKFILES: [(&str, PackageManager); 6] = [
    ("bun.lockb", PackageManager::Bun),
    ("bun.lock", PackageManager::Bun),
    ("pnpm-lock.yaml", PackageManager::Pnpm),
    ("yarn.lock", PackageManager::Yarn),
    ("package-lock.json", PackageManager::Npm),
    ("npm-shrinkwrap.json", PackageManager::Npm),
];

/// A validation failure inside the config document.
struct FieldError {
    message: String,
    key: Option<String>,
}

impl FieldError {
    fn new(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

/// Infers the package manager from lockfiles at the task root.
pub fn infer_package_manager(task_path: &Path) -> Option<PackageManager> {
    for (file, pm) in LOCKFILES {
        if task_path.join(file).exists() {
            return Some(pm);
        }
    }
    None
}

/// Detects the effective package manager for a working directory.
///
/// Lockfile evidence wins over whatever the config declares, because the
/// config can go stale after a migration. Falls back to npm.
pub fn detect_package_manager(workdir: &Path) -> PackageManager {
    infer_package_manager(workdir).unwrap_or(PackageManager::Npm)
}

/// Loads and resolves the run configuration for a task checkout.
pub fn load_run_config(task_path: &Path) -> Result<LoadedConfig, ConfigLoadError> {
    let config_path = task_path.join(CONFIG_RELATIVE_PATH);
    let inferred = infer_package_manager(task_path);

    let content = read_config_file(&config_path)?;

    let (raw, source_path) = match content {
        Some(text) => {
            let parsed = serde_json::from_str::<Value>(&text).map_err(|_| ConfigLoadError {
                code: ErrorCode::InvalidJson,
                message: format!("invalid JSON in {}", config_path.display()),
                config_path: Some(config_path.to_string_lossy().to_string()),
                config_key: None,
            })?;
            (parsed, Some(config_path.to_string_lossy().to_string()))
        }
        None => {
            debug!(path = %config_path.display(), "no config file, using defaults");
            (Value::Object(serde_json::Map::new()), None)
        }
    };

    match resolve(&raw, inferred) {
        Ok(config) => Ok(LoadedConfig {
            config,
            source_path,
        }),
        Err(err) => Err(ConfigLoadError {
            code: ErrorCode::ValidationFailed,
            message: err.message,
            config_path: Some(config_path.to_string_lossy().to_string()),
            config_key: err.key,
        }),
    }
}

/// Reads the config file, treating "not found" as an absent config rather
/// than an error.
fn read_config_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ConfigLoadError {
            code: ErrorCode::IoError,
            message: format!("failed to read {}: {}", path.display(), err),
            config_path: Some(path.to_string_lossy().to_string()),
            config_key: None,
        }),
    }
}

fn resolve(input: &Value, inferred: Option<PackageManager>) -> Result<RunConfig, FieldError> {
    let obj = input.as_object().cloned().unwrap_or_default();

    let version = resolve_version(obj.get("version"))?;
    let package_manager = resolve_package_manager(obj.get("packageManager"), inferred)?;
    let start = resolve_start(obj.get("start"), package_manager)?;
    let env_file = resolve_env_file(obj.get("envFile"))?;
    let workdir = resolve_workdir(obj.get("workdir"))?;
    let ports = resolve_ports(obj.get("ports"))?;

    Ok(RunConfig {
        version,
        package_manager,
        start,
        env_file,
        workdir,
        ports,
    })
}

fn resolve_version(raw: Option<&Value>) -> Result<i64, FieldError> {
    match raw {
        None | Some(Value::Null) => Ok(CONFIG_VERSION),
        Some(Value::Number(num)) if num.is_i64() => {
            let v = num.as_i64().unwrap_or(CONFIG_VERSION);
            if v != CONFIG_VERSION {
                return Err(FieldError::new(
                    format!("only config version {CONFIG_VERSION} is supported"),
                    "version",
                ));
            }
            Ok(v)
        }
        _ => Err(FieldError::new("`version` must be an integer", "version")),
    }
}

fn resolve_package_manager(
    raw: Option<&Value>,
    inferred: Option<PackageManager>,
) -> Result<PackageManager, FieldError> {
    match raw {
        None | Some(Value::Null) => Ok(inferred.unwrap_or(PackageManager::Npm)),
        Some(value) => {
            let text = value.as_str().unwrap_or("");
            PackageManager::parse(text).ok_or_else(|| {
                FieldError::new(
                    "`packageManager` must be one of \"npm\", \"pnpm\", \"yarn\", or \"bun\"",
                    "packageManager",
                )
            })
        }
    }
}

fn resolve_start(raw: Option<&Value>, package_manager: PackageManager) -> Result<String, FieldError> {
    match raw {
        None | Some(Value::Null) => Ok(package_manager.default_start_command().to_string()),
        Some(value) => {
            let text = value.as_str().unwrap_or("").trim();
            if text.is_empty() {
                return Err(FieldError::new("`start` cannot be empty", "start"));
            }
            Ok(text.to_string())
        }
    }
}

fn resolve_env_file(raw: Option<&Value>) -> Result<Option<String>, FieldError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let text = value.as_str().unwrap_or("").trim();
            if text.is_empty() {
                return Err(FieldError::new("`envFile` cannot be empty", "envFile"));
            }
            Ok(Some(text.to_string()))
        }
    }
}

fn resolve_workdir(raw: Option<&Value>) -> Result<String, FieldError> {
    match raw {
        None | Some(Value::Null) => Ok(DEFAULT_WORKDIR.to_string()),
        Some(value) => {
            let text = value.as_str().unwrap_or("").trim();
            if text.is_empty() {
                return Err(FieldError::new("`workdir` cannot be empty", "workdir"));
            }
            Ok(text.to_string())
        }
    }
}

fn resolve_ports(raw: Option<&Value>) -> Result<Vec<PortRequest>, FieldError> {
    let list = match raw {
        None | Some(Value::Null) => return Ok(vec![RunConfig::default_port()]),
        Some(value) => value
            .as_array()
            .ok_or_else(|| FieldError::new("`ports` must be an array", "ports"))?,
    };

    if list.is_empty() {
        return Ok(vec![RunConfig::default_port()]);
    }

    let mut result = Vec::with_capacity(list.len());
    for (idx, entry) in list.iter().enumerate() {
        let key = format!("ports[{idx}]");
        let obj = entry
            .as_object()
            .ok_or_else(|| FieldError::new("each port entry must be an object", key.clone()))?;

        let service = obj
            .get("service")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if service.is_empty() {
            return Err(FieldError::new(
                "`service` must be a non-empty string",
                format!("{key}.service"),
            ));
        }

        let container = obj.get("container").and_then(|v| v.as_i64()).unwrap_or(-1);
        if !(1..=65535).contains(&container) {
            return Err(FieldError::new(
                "`container` must be between 1 and 65535",
                format!("{key}.container"),
            ));
        }

        if let Some(protocol) = obj.get("protocol") {
            let is_tcp = protocol
                .as_str()
                .map(|p| p.eq_ignore_ascii_case("tcp"))
                .unwrap_or(false);
            if !is_tcp && !protocol.is_null() {
                return Err(FieldError::new(
                    "only TCP protocol is supported",
                    format!("{key}.protocol"),
                ));
            }
        }

        if let Some(preview) = obj.get("preview") {
            if !preview.is_boolean() && !preview.is_null() {
                return Err(FieldError::new(
                    "`preview` must be a boolean when provided",
                    format!("{key}.preview"),
                ));
            }
        }

        result.push(PortRequest {
            service: service.to_string(),
            container: container as u16,
            protocol: "tcp".to_string(),
            preview: obj.get("preview").and_then(|v| v.as_bool()).unwrap_or(false),
        });
    }

    ensure_single_preview(&mut result);
    ensure_unique_services(&result)?;
    Ok(result)
}

/// Normalizes preview flags: keeps the first flagged entry, clears the
/// rest, and promotes the first entry when none is flagged.
fn ensure_single_preview(ports: &mut [PortRequest]) {
    let mut seen = false;
    for port in ports.iter_mut() {
        if port.preview {
            if seen {
                port.preview = false;
            }
            seen = true;
        }
    }
    if !seen {
        if let Some(first) = ports.first_mut() {
            first.preview = true;
        }
    }
}

fn ensure_unique_services(ports: &[PortRequest]) -> Result<(), FieldError> {
    let mut seen = HashSet::new();
    for (idx, port) in ports.iter().enumerate() {
        if !seen.insert(port.service.as_str()) {
            return Err(FieldError::new(
                format!("duplicate service name \"{}\" in ports array", port.service),
                format!("ports[{idx}].service"),
            ));
        }
    }
    Ok(())
}
