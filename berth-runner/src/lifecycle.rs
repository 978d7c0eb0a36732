//! Run lifecycle driver
//!
//! Executes the start/stop/inspect sequences against the container engine,
//! emitting the typed event stream as each phase is reached. Three start
//! strategies exist: compose (manifest at the checkout root), direct
//! (single node container over the mounted checkout), and mock (host mode,
//! allocation only, no engine).
//!
//! Event ordering per successful start: `building` (direct/mock only),
//! `starting`, `ports`, `ready`, then a `result`. Failures emit an `error`
//! event and a failed `result`; precondition failures never emit
//! `starting`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use berth_core::domain::config::{PackageManager, PortRequest, RunConfig};
use berth_core::domain::event::{PublishedPort, RunEvent, RunEventPayload};
use berth_core::domain::ports::PortBinding;
use berth_core::domain::run::{LifecycleStatus, RunMode, RunOutcomeStatus};
use berth_core::dto::run::{InspectReport, RunFailure};

use crate::compose::{build_override_yaml, discover_service_ports, sanitize_rendered_config};
use crate::config::detect_package_manager;
use crate::engine::{ContainerEngine, RunContainerSpec};
use crate::events::EventBus;
use crate::ports::PortAllocator;
use crate::preview::{select_preview, select_preview_published};

/// Per-task state directory under the checkout root.
pub const STATE_DIR: &str = ".berth";
const SANITIZED_MANIFEST: &str = "compose.sanitized.json";
const OVERRIDE_MANIFEST: &str = "compose.override.yml";

/// Engine-side name shared by the compose project and the direct
/// container for a task.
pub fn project_name(task_id: &str) -> String {
    format!("berth_ws_{task_id}")
}

/// Fresh run identifier when the caller supplied none.
pub fn generate_run_id() -> String {
    format!("r_{}", chrono::Utc::now().to_rfc3339())
}

/// Identity of one run, threaded through every emitted event.
#[derive(Debug, Clone)]
pub struct RunScope {
    pub task_id: String,
    pub run_id: String,
    pub mode: RunMode,
}

/// Drives one run's lifecycle against the engine, fanning events out on
/// the bus as phases complete.
pub struct LifecycleDriver {
    engine: Arc<dyn ContainerEngine>,
    allocator: Arc<dyn PortAllocator>,
    bus: EventBus,
}

impl LifecycleDriver {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        allocator: Arc<dyn PortAllocator>,
        bus: EventBus,
    ) -> Self {
        Self {
            engine,
            allocator,
            bus,
        }
    }

    fn emit(&self, scope: &RunScope, payload: RunEventPayload) {
        self.bus.emit(&RunEvent::now(
            &scope.task_id,
            &scope.run_id,
            scope.mode,
            payload,
        ));
    }

    fn emit_lifecycle(&self, scope: &RunScope, status: LifecycleStatus, container_id: Option<String>) {
        self.emit(
            scope,
            RunEventPayload::Lifecycle {
                status,
                container_id,
            },
        );
    }

    fn emit_ports(&self, scope: &RunScope, bindings: &[PortBinding], preview_service: &str) {
        self.emit(
            scope,
            RunEventPayload::Ports {
                preview_service: preview_service.to_string(),
                ports: bindings.iter().map(PublishedPort::from).collect(),
            },
        );
    }

    /// Emits the error event plus a failed result, then hands the failure
    /// back to the caller.
    pub(crate) fn fail(&self, scope: &RunScope, failure: RunFailure) -> RunFailure {
        self.emit(
            scope,
            RunEventPayload::Error {
                code: failure.code,
                message: failure.message.clone(),
            },
        );
        self.emit(
            scope,
            RunEventPayload::Result {
                status: RunOutcomeStatus::Failed,
            },
        );
        failure
    }

    fn succeed(&self, scope: &RunScope) {
        self.emit(
            scope,
            RunEventPayload::Result {
                status: RunOutcomeStatus::Succeeded,
            },
        );
    }

    /// Starts a multi-service stack from the manifest at the checkout root.
    pub async fn start_compose(
        &self,
        scope: &RunScope,
        task_path: &Path,
        config: &RunConfig,
        compose_file: &Path,
    ) -> Result<(), RunFailure> {
        if let Err(err) = self.engine.compose_version().await {
            debug!(error = %err, "compose availability probe failed");
            return Err(self.fail(
                scope,
                RunFailure::unknown(
                    "Docker Compose is not available. Please install/update Docker Desktop.",
                ),
            ));
        }

        // Discovery is best-effort: an unrenderable manifest falls back to
        // the configured port requests.
        let rendered = self.engine.compose_render(compose_file, task_path).await.ok();
        let discovered = rendered
            .as_ref()
            .map(discover_service_ports)
            .unwrap_or_default();
        let requests: Vec<PortRequest> = if discovered.is_empty() {
            config.ports.clone()
        } else {
            discovered
                .into_iter()
                .map(|(service, container)| PortRequest {
                    service,
                    container,
                    protocol: "tcp".to_string(),
                    preview: false,
                })
                .collect()
        };

        let allocations = match self.allocator.allocate(&requests) {
            Ok(bindings) => bindings,
            Err(err) => {
                return Err(self.fail(scope, RunFailure::port_alloc_failed(err.message)));
            }
        };
        let preview_service = select_preview(&requests);

        let state_dir = task_path.join(STATE_DIR);
        if let Err(err) = std::fs::create_dir_all(&state_dir) {
            warn!(error = %err, "unable to create run state directory");
        }

        let mut requested_map: HashMap<String, Vec<u16>> = HashMap::new();
        for request in &requests {
            requested_map
                .entry(request.service.clone())
                .or_default()
                .push(request.container);
        }

        // Sanitization is best-effort; the original manifest still works,
        // it just publishes its own host ports alongside ours.
        let sanitized_path = state_dir.join(SANITIZED_MANIFEST);
        let mut manifest_for_up = compose_file.to_path_buf();
        if let Some(rendered) = &rendered {
            let sanitized = sanitize_rendered_config(rendered, &requested_map);
            match serde_json::to_string_pretty(&sanitized) {
                Ok(body) => match std::fs::write(&sanitized_path, body) {
                    Ok(()) => manifest_for_up = sanitized_path.clone(),
                    Err(err) => warn!(error = %err, "unable to persist sanitized manifest"),
                },
                Err(err) => warn!(error = %err, "unable to serialize sanitized manifest"),
            }
        }

        // The override fragment carries the allocated host ports; without
        // it the stack would publish nothing, so failure here is fatal.
        let override_path = state_dir.join(OVERRIDE_MANIFEST);
        let override_yaml = build_override_yaml(&allocations);
        if let Err(err) = std::fs::write(&override_path, override_yaml) {
            return Err(self.fail(
                scope,
                RunFailure::unknown(format!("unable to write port override fragment: {err}")),
            ));
        }

        let env_file = config
            .env_file
            .as_ref()
            .map(|rel| task_path.join(rel))
            .filter(|abs| abs.exists());

        self.emit_lifecycle(scope, LifecycleStatus::Starting, None);

        let project = project_name(&scope.task_id);
        let files = vec![manifest_for_up, override_path];
        if let Err(err) = self
            .engine
            .compose_up(&project, &files, env_file.as_deref(), task_path)
            .await
        {
            return Err(self.fail(scope, RunFailure::unknown(err.to_string())));
        }

        let published = match self.engine.compose_ps(&project).await {
            Ok(output) => parse_compose_ps(&output, &allocations),
            Err(err) => {
                debug!(error = %err, "compose state listing failed; using allocations");
                allocations.clone()
            }
        };

        self.emit_ports(scope, &published, &preview_service);
        self.emit_lifecycle(scope, LifecycleStatus::Ready, None);
        self.succeed(scope);
        info!(task_id = %scope.task_id, project, "compose stack started");
        Ok(())
    }

    /// Starts a single dev container directly over the mounted checkout.
    pub async fn start_direct(
        &self,
        scope: &RunScope,
        task_path: &Path,
        config: &RunConfig,
    ) -> Result<(), RunFailure> {
        let workdir_abs = task_path.join(&config.workdir);
        if !workdir_abs.exists() {
            let message = format!("Configured workdir does not exist: {}", workdir_abs.display());
            return Err(self.fail(
                scope,
                RunFailure::invalid_argument(message)
                    .with_config_path(workdir_abs.to_string_lossy())
                    .with_config_key("workdir"),
            ));
        }
        if !workdir_abs.join("package.json").exists() {
            let message = format!(
                "No package.json found in workdir: {}. Set the correct 'workdir' in {}/config.json",
                workdir_abs.display(),
                STATE_DIR
            );
            return Err(self.fail(
                scope,
                RunFailure::invalid_argument(message)
                    .with_config_path(workdir_abs.to_string_lossy())
                    .with_config_key("workdir"),
            ));
        }

        if let Err(err) = self.engine.daemon_ready().await {
            debug!(error = %err, "engine daemon probe failed");
            return Err(self.fail(
                scope,
                RunFailure::unknown(
                    "Docker is not available or not responding. Please start Docker Desktop.",
                ),
            ));
        }

        let allocations = match self.allocator.allocate(&config.ports) {
            Ok(bindings) => bindings,
            Err(err) => {
                return Err(self.fail(scope, RunFailure::port_alloc_failed(err.message)));
            }
        };
        let preview_service = select_preview(&config.ports);
        let preview_binding = allocations
            .iter()
            .find(|binding| binding.service == preview_service);

        self.emit_lifecycle(scope, LifecycleStatus::Building, None);

        let container_name = project_name(&scope.task_id);
        // A leftover container from an earlier run would collide on name.
        if let Err(err) = self.engine.remove_container(&container_name).await {
            debug!(error = %err, "pre-start container removal failed");
        }

        let env_file = match &config.env_file {
            Some(rel) => {
                let env_abs = task_path.join(rel);
                if !env_abs.exists() {
                    let message = format!("Env file not found: {}", env_abs.display());
                    return Err(self.fail(
                        scope,
                        RunFailure::unknown(message)
                            .with_config_path(env_abs.to_string_lossy())
                            .with_config_key("envFile"),
                    ));
                }
                Some(env_abs)
            }
            None => None,
        };

        let package_manager = detect_package_manager(&workdir_abs);
        let image = match package_manager {
            PackageManager::Bun => "oven/bun:1.3.5",
            _ => "node:20",
        };
        let command = format!("{} && {}", install_command(package_manager), config.start);

        let mut env = vec![("HOST".to_string(), "0.0.0.0".to_string())];
        if let Some(preview) = preview_binding {
            env.push(("PORT".to_string(), preview.container.to_string()));
        }

        let container_workdir = Path::new("/workspace").join(config.workdir.replace('\\', "/"));
        let spec = RunContainerSpec {
            name: container_name,
            image: image.to_string(),
            ports: allocations.clone(),
            mount_source: task_path.to_path_buf(),
            workdir: container_workdir.to_string_lossy().into_owned(),
            env,
            env_file,
            command,
        };

        self.emit_lifecycle(scope, LifecycleStatus::Starting, None);

        let container_id = match self.engine.run_detached(&spec).await {
            Ok(id) => id,
            Err(err) => {
                return Err(self.fail(scope, RunFailure::unknown(err.to_string())));
            }
        };

        self.emit_ports(scope, &allocations, &preview_service);
        self.emit_lifecycle(scope, LifecycleStatus::Starting, Some(container_id));
        self.emit_lifecycle(scope, LifecycleStatus::Ready, None);
        self.succeed(scope);
        info!(task_id = %scope.task_id, image, "dev container started");
        Ok(())
    }

    /// Host-mode start: allocates ports and walks the lifecycle without
    /// touching the engine.
    pub fn start_mock(&self, scope: &RunScope, config: &RunConfig) -> Result<(), RunFailure> {
        let allocations = match self.allocator.allocate(&config.ports) {
            Ok(bindings) => bindings,
            Err(err) => {
                return Err(self.fail(scope, RunFailure::port_alloc_failed(err.message)));
            }
        };
        let preview_service = select_preview(&config.ports);

        self.emit_lifecycle(scope, LifecycleStatus::Building, None);
        self.emit_lifecycle(
            scope,
            LifecycleStatus::Starting,
            Some(project_name(&scope.task_id)),
        );
        self.emit_ports(scope, &allocations, &preview_service);
        self.emit_lifecycle(scope, LifecycleStatus::Ready, None);
        self.succeed(scope);
        Ok(())
    }

    /// Tears down whatever a task left behind, compose or direct. Both
    /// teardown calls are best-effort; `stopped` is always reached.
    pub async fn stop(&self, task_id: &str) {
        let scope = RunScope {
            task_id: task_id.to_string(),
            run_id: generate_run_id(),
            mode: RunMode::Container,
        };
        self.emit_lifecycle(&scope, LifecycleStatus::Stopping, None);

        let name = project_name(task_id);
        if let Err(err) = self.engine.compose_down(&name).await {
            debug!(error = %err, "compose teardown failed");
        }
        if let Err(err) = self.engine.remove_container(&name).await {
            debug!(error = %err, "container removal failed");
        }

        self.emit_lifecycle(&scope, LifecycleStatus::Stopped, None);
        info!(task_id, "run stopped");
    }

    /// Reports current engine-side state for a task's project.
    pub async fn inspect(&self, task_id: &str) -> Result<InspectReport, RunFailure> {
        let project = project_name(task_id);
        let output = self
            .engine
            .compose_ps(&project)
            .await
            .map_err(|err| RunFailure::unknown(err.to_string()))?;

        let ports = parse_compose_ps(&output, &[]);
        let running = output.to_lowercase().contains("running");
        let preview_service = select_preview_published(&ports);
        Ok(InspectReport {
            running,
            ports,
            preview_service,
        })
    }
}

fn install_command(package_manager: PackageManager) -> &'static str {
    match package_manager {
        PackageManager::Npm => {
            "if [ -f package-lock.json ]; then npm ci; else npm install --no-package-lock; fi"
        }
        PackageManager::Bun => {
            "if [ -f bun.lockb ] || [ -f bun.lock ]; then bun install --frozen-lockfile; else bun install; fi"
        }
        PackageManager::Pnpm => {
            "corepack enable && if [ -f pnpm-lock.yaml ]; then pnpm install --frozen-lockfile; else pnpm install; fi"
        }
        PackageManager::Yarn => {
            "corepack enable && if [ -f yarn.lock ]; then yarn install --frozen-lockfile || yarn install; else yarn install; fi"
        }
    }
}

/// Parses `compose ps --format json` output, which older engines emit as
/// a JSON array and newer ones as one object per line. Field names vary
/// across engine versions, so each is tried under its known aliases.
/// Unusable output falls back to the caller's own allocations.
pub(crate) fn parse_compose_ps(output: &str, fallback: &[PortBinding]) -> Vec<PortBinding> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return fallback.to_vec();
    }

    let mut records: Vec<serde_json::Value> = Vec::new();
    if trimmed.starts_with('[') {
        if let Ok(serde_json::Value::Array(list)) = serde_json::from_str(trimmed) {
            records = list;
        }
    } else {
        for line in trimmed.lines() {
            if let Ok(parsed) = serde_json::from_str(line) {
                records.push(parsed);
            }
        }
    }

    let mut bindings = Vec::new();
    for record in records {
        let service = ["Service", "service", "Name", "name"]
            .iter()
            .find_map(|key| record.get(*key))
            .and_then(|value| value.as_str())
            .unwrap_or("");
        if service.is_empty() {
            continue;
        }

        let publishers = record
            .get("Publishers")
            .or_else(|| record.get("Ports"))
            .and_then(|value| value.as_array())
            .cloned()
            .unwrap_or_default();
        for publisher in publishers {
            let target = ["TargetPort", "target", "Target", "ContainerPort"]
                .iter()
                .find_map(|key| publisher.get(*key))
                .and_then(|value| value.as_i64());
            let published = ["PublishedPort", "published", "HostPort"]
                .iter()
                .find_map(|key| publisher.get(*key))
                .and_then(|value| value.as_i64());
            let target = target.and_then(|raw| u16::try_from(raw).ok());
            let published = published.and_then(|raw| u16::try_from(raw).ok());
            if let (Some(target), Some(published)) = (target, published) {
                bindings.push(PortBinding::new(service, target, published));
            }
        }
    }

    if bindings.is_empty() {
        fallback.to_vec()
    } else {
        bindings
    }
}
