//! Run registry
//!
//! Public start/stop/inspect surface. The registry owns the event bus and
//! the lifecycle driver, and enforces one concurrent start per task: a
//! `start` that arrives while the same task is already starting joins the
//! pending outcome instead of launching a second engine sequence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, info};

use berth_core::domain::run::RunMode;
use berth_core::dto::run::{InspectReport, RunFailure, StartRunRequest, StartedRun};

use crate::compose::find_compose_file;
use crate::config::load_run_config;
use crate::engine::ContainerEngine;
use crate::events::{EventBus, SubscriptionId};
use crate::lifecycle::{generate_run_id, LifecycleDriver, RunScope};
use crate::ports::PortAllocator;

type StartResult = Result<StartedRun, RunFailure>;

/// Entry point for driving container runs.
///
/// Cheap to share via `Arc`; all methods take `&self`.
pub struct RunRegistry {
    driver: Arc<LifecycleDriver>,
    bus: EventBus,
    inflight: Mutex<HashMap<String, watch::Receiver<Option<StartResult>>>>,
}

/// Removes the in-flight entry when the spawned start settles, including
/// when it panics.
struct InflightGuard {
    registry: Arc<RunRegistry>,
    task_id: String,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut inflight) = self.registry.inflight.lock() {
            inflight.remove(&self.task_id);
        }
    }
}

impl RunRegistry {
    pub fn new(engine: Arc<dyn ContainerEngine>, allocator: Arc<dyn PortAllocator>) -> Arc<Self> {
        let bus = EventBus::new();
        let driver = Arc::new(LifecycleDriver::new(engine, allocator, bus.clone()));
        Arc::new(Self {
            driver,
            bus,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a listener for all run events.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&berth_core::domain::event::RunEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Starts a run for a task checkout, joining any start already in
    /// flight for the same task.
    pub async fn start(self: &Arc<Self>, request: StartRunRequest) -> StartResult {
        let mode = request.mode.unwrap_or(RunMode::Container);
        self.start_with_mode(request, mode).await
    }

    /// Starts a host-mode mock run regardless of the requested mode.
    pub async fn start_mock(self: &Arc<Self>, request: StartRunRequest) -> StartResult {
        self.start_with_mode(request, RunMode::Host).await
    }

    async fn start_with_mode(
        self: &Arc<Self>,
        request: StartRunRequest,
        mode: RunMode,
    ) -> StartResult {
        validate_identity(&request.task_id, &request.task_path)?;
        let task_id = request.task_id.trim().to_string();

        let mut rx = {
            let mut inflight = self
                .inflight
                .lock()
                .map_err(|_| RunFailure::unknown("in-flight run map poisoned"))?;

            if let Some(existing) = inflight.get(&task_id) {
                debug!(task_id = %task_id, "joining start already in flight");
                existing.clone()
            } else {
                let (tx, rx) = watch::channel(None);
                inflight.insert(task_id.clone(), rx.clone());

                let registry = Arc::clone(self);
                let guard_task_id = task_id.clone();
                tokio::spawn(async move {
                    let _guard = InflightGuard {
                        registry: Arc::clone(&registry),
                        task_id: guard_task_id,
                    };
                    let outcome = registry.execute(request, mode).await;
                    let _ = tx.send(Some(outcome));
                });
                rx
            }
        };

        loop {
            {
                let settled = rx.borrow();
                if let Some(outcome) = settled.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(RunFailure::unknown("run task dropped before settling"));
            }
        }
    }

    /// Runs the full start sequence for one task. Only ever invoked from
    /// the single spawned task per in-flight entry.
    async fn execute(&self, request: StartRunRequest, mode: RunMode) -> StartResult {
        let task_id = request.task_id.trim();
        let task_path = PathBuf::from(request.task_path.trim());
        let run_id = request.run_id.unwrap_or_else(generate_run_id);
        let scope = RunScope {
            task_id: task_id.to_string(),
            run_id: run_id.clone(),
            mode,
        };

        let loaded = match load_run_config(&task_path) {
            Ok(loaded) => loaded,
            Err(err) => {
                return Err(self.driver.fail(&scope, RunFailure::from(err)));
            }
        };

        info!(task_id, run_id = %run_id, %mode, "starting run");
        match mode {
            RunMode::Host => self.driver.start_mock(&scope, &loaded.config)?,
            RunMode::Container => match find_compose_file(&task_path) {
                Some(compose_file) => {
                    self.driver
                        .start_compose(&scope, &task_path, &loaded.config, &compose_file)
                        .await?
                }
                None => {
                    self.driver
                        .start_direct(&scope, &task_path, &loaded.config)
                        .await?
                }
            },
        }

        Ok(StartedRun {
            run_id,
            config: loaded.config,
            source_path: loaded.source_path,
        })
    }

    /// Tears down whatever the task has running. Always settles.
    pub async fn stop(&self, task_id: &str) -> Result<(), RunFailure> {
        validate_task_id(task_id)?;
        self.driver.stop(task_id.trim()).await;
        Ok(())
    }

    /// Reports the task's current engine-side state.
    pub async fn inspect(&self, task_id: &str) -> Result<InspectReport, RunFailure> {
        validate_task_id(task_id)?;
        self.driver.inspect(task_id.trim()).await
    }

    /// Loads and resolves the task's run configuration without starting
    /// anything.
    pub fn load_config(
        &self,
        task_path: &str,
    ) -> Result<berth_core::dto::config::LoadedConfig, RunFailure> {
        let trimmed = task_path.trim();
        if trimmed.is_empty() {
            return Err(RunFailure::invalid_argument(
                "`taskPath` must be a non-empty string",
            ));
        }
        load_run_config(Path::new(trimmed)).map_err(RunFailure::from)
    }
}

fn validate_identity(task_id: &str, task_path: &str) -> Result<(), RunFailure> {
    if task_id.trim().is_empty() || task_path.trim().is_empty() {
        return Err(RunFailure::invalid_argument(
            "`taskId` and `taskPath` are required",
        ));
    }
    Ok(())
}

fn validate_task_id(task_id: &str) -> Result<(), RunFailure> {
    if task_id.trim().is_empty() {
        return Err(RunFailure::invalid_argument("`taskId` must be provided"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use serde_json::json;

    use berth_core::domain::event::RunEventPayload;
    use berth_core::domain::run::{ErrorCode, LifecycleStatus};

    use crate::testkit::{capture_events, FailingAllocator, MockEngine, SequentialAllocator};

    fn registry_with(engine: MockEngine) -> (Arc<RunRegistry>, Arc<MockEngine>) {
        let engine = Arc::new(engine);
        let registry = RunRegistry::new(
            Arc::clone(&engine) as Arc<dyn ContainerEngine>,
            Arc::new(SequentialAllocator::default()),
        );
        (registry, engine)
    }

    fn direct_checkout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        dir
    }

    fn compose_checkout() -> tempfile::TempDir {
        let dir = direct_checkout();
        fs::write(
            dir.path().join("docker-compose.yml"),
            "services:\n  web:\n    image: node:20\n    ports:\n      - \"3000:3000\"\n",
        )
        .unwrap();
        dir
    }

    fn request(task_id: &str, dir: &tempfile::TempDir) -> StartRunRequest {
        StartRunRequest::new(task_id, dir.path().to_string_lossy())
    }

    #[tokio::test]
    async fn test_empty_identity_is_rejected() {
        let (registry, engine) = registry_with(MockEngine::default());
        let err = registry
            .start(StartRunRequest::new("  ", "/tmp/x"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(engine.total_calls(), 0);

        let err = registry.stop("").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_concurrent_starts_share_one_run() {
        let (registry, engine) = registry_with(MockEngine {
            run_delay: Some(Duration::from_millis(50)),
            ..MockEngine::default()
        });
        let dir = direct_checkout();

        let first = registry.start(request("t1", &dir));
        let second = registry.start(request("t1", &dir));
        let (first, second) = tokio::join!(first, second);

        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.run_id, second.run_id);
        assert_eq!(engine.count("run_detached"), 1);
    }

    #[tokio::test]
    async fn test_sequential_starts_run_independently() {
        let (registry, engine) = registry_with(MockEngine::default());
        let dir = direct_checkout();

        registry.start(request("t1", &dir)).await.unwrap();
        registry.start(request("t1", &dir)).await.unwrap();
        assert_eq!(engine.count("run_detached"), 2);
    }

    #[tokio::test]
    async fn test_missing_workdir_fails_before_engine() {
        let (registry, engine) = registry_with(MockEngine::default());
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join(".berth")).unwrap();
        fs::write(
            dir.path().join(".berth").join("config.json"),
            json!({"version": 1, "workdir": "missing"}).to_string(),
        )
        .unwrap();

        let events = capture_events(registry.bus());
        let err = registry.start(request("t1", &dir)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::InvalidArgument);
        assert_eq!(err.config_key.as_deref(), Some("workdir"));
        assert_eq!(engine.total_calls(), 0);

        let events = events.lock().unwrap();
        assert!(events.iter().any(|event| event.is_error()));
        assert!(!events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Starting)));
    }

    #[tokio::test]
    async fn test_compose_probe_failure_emits_single_error() {
        let (registry, engine) = registry_with(MockEngine {
            compose_version_ok: false,
            ..MockEngine::default()
        });
        let dir = compose_checkout();

        let events = capture_events(registry.bus());
        let err = registry.start(request("t1", &dir)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::Unknown);
        assert_eq!(engine.count("compose_up"), 0);

        let events = events.lock().unwrap();
        assert_eq!(events.iter().filter(|event| event.is_error()).count(), 1);
        assert!(!events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Starting)));
    }

    #[tokio::test]
    async fn test_compose_start_publishes_discovered_ports() {
        let rendered = json!({
            "services": {
                "web": {"image": "node:20", "ports": ["3000:3000"]},
                "db": {"image": "postgres:16", "ports": [{"target": 5432}]}
            }
        });
        let (registry, engine) = registry_with(MockEngine {
            rendered: Some(rendered),
            ..MockEngine::default()
        });
        let dir = compose_checkout();

        let events = capture_events(registry.bus());
        let started = registry.start(request("t1", &dir)).await.unwrap();
        assert!(started.run_id.starts_with("r_"));
        assert_eq!(engine.count("compose_up"), 1);

        let events = events.lock().unwrap();
        let ports_event = events
            .iter()
            .find_map(|event| match &event.payload {
                RunEventPayload::Ports {
                    preview_service,
                    ports,
                } => Some((preview_service.clone(), ports.clone())),
                _ => None,
            })
            .unwrap();
        assert_eq!(ports_event.0, "web");
        let web = ports_event
            .1
            .iter()
            .find(|port| port.service == "web")
            .unwrap();
        assert_eq!(web.container, 3000);
        assert_eq!(web.url, format!("http://localhost:{}", web.host));
        assert!(ports_event.1.iter().any(|port| port.container == 5432));

        assert!(events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Ready)));

        // Artifacts land in the task state directory.
        assert!(dir.path().join(".berth/compose.override.yml").exists());
        assert!(dir.path().join(".berth/compose.sanitized.json").exists());
    }

    #[tokio::test]
    async fn test_missing_env_file_fails_after_building() {
        let (registry, engine) = registry_with(MockEngine::default());
        let dir = direct_checkout();
        fs::create_dir_all(dir.path().join(".berth")).unwrap();
        fs::write(
            dir.path().join(".berth").join("config.json"),
            json!({"envFile": ".env.missing"}).to_string(),
        )
        .unwrap();

        let events = capture_events(registry.bus());
        let err = registry.start(request("t1", &dir)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::Unknown);
        assert_eq!(err.config_key.as_deref(), Some("envFile"));
        assert_eq!(engine.count("run_detached"), 0);

        // The env file is checked only after the stale-container cleanup,
        // so listeners have already seen `building`.
        assert_eq!(engine.count("remove_container"), 1);
        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Building)));
        assert!(!events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Starting)));
    }

    #[tokio::test]
    async fn test_daemon_down_fails_direct_start_before_run() {
        let (registry, engine) = registry_with(MockEngine {
            daemon_ok: false,
            ..MockEngine::default()
        });
        let dir = direct_checkout();

        let err = registry.start(request("t1", &dir)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(err.message.contains("Docker is not available"));
        assert_eq!(engine.count("run_detached"), 0);
    }

    #[tokio::test]
    async fn test_compose_up_failure_surfaces_engine_message() {
        let (registry, engine) = registry_with(MockEngine {
            fail_up: true,
            ..MockEngine::default()
        });
        let dir = compose_checkout();

        let events = capture_events(registry.bus());
        let err = registry.start(request("t1", &dir)).await.unwrap_err();

        assert_eq!(err.code, ErrorCode::Unknown);
        assert!(err.message.contains("image pull failed"));
        assert_eq!(engine.count("compose_ps"), 0);

        // The failure happened after `starting` was announced.
        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Starting)));
        assert!(events.iter().any(|event| event.is_error()));
    }

    #[tokio::test]
    async fn test_mock_start_walks_lifecycle_without_engine() {
        let (registry, engine) = registry_with(MockEngine::default());
        let dir = direct_checkout();

        let events = capture_events(registry.bus());
        let mut request = request("t1", &dir);
        request.run_id = Some("r_fixed".to_string());
        let started = registry.start_mock(request).await.unwrap();

        assert_eq!(started.run_id, "r_fixed");
        assert_eq!(engine.total_calls(), 0);

        let events = events.lock().unwrap();
        for status in [
            LifecycleStatus::Building,
            LifecycleStatus::Starting,
            LifecycleStatus::Ready,
        ] {
            assert!(events.iter().any(|event| event.is_lifecycle(status)));
        }
    }

    #[tokio::test]
    async fn test_allocation_failure_reports_port_alloc_failed() {
        let engine = Arc::new(MockEngine::default());
        let registry = RunRegistry::new(
            Arc::clone(&engine) as Arc<dyn ContainerEngine>,
            Arc::new(FailingAllocator),
        );
        let dir = direct_checkout();

        let err = registry.start_mock(request("t1", &dir)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PortAllocFailed);
    }

    #[tokio::test]
    async fn test_stop_with_nothing_running_settles() {
        let (registry, engine) = registry_with(MockEngine::default());

        let events = capture_events(registry.bus());
        registry.stop("t1").await.unwrap();

        assert_eq!(engine.count("compose_down"), 1);
        assert_eq!(engine.count("remove_container"), 1);

        let events = events.lock().unwrap();
        assert!(events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Stopping)));
        assert!(events
            .iter()
            .any(|event| event.is_lifecycle(LifecycleStatus::Stopped)));
    }

    #[tokio::test]
    async fn test_inspect_reports_running_state() {
        let ps = r#"[{"Service": "web", "State": "running", "Publishers": [{"TargetPort": 3000, "PublishedPort": 51000}]}]"#;
        let (registry, _engine) = registry_with(MockEngine {
            ps_output: Some(ps.to_string()),
            ..MockEngine::default()
        });

        let report = registry.inspect("t1").await.unwrap();
        assert!(report.running);
        assert_eq!(report.ports.len(), 1);
        assert_eq!(report.preview_service.as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn test_invalid_config_json_fails_start() {
        let (registry, engine) = registry_with(MockEngine::default());
        let dir = direct_checkout();
        fs::create_dir_all(dir.path().join(".berth")).unwrap();
        fs::write(dir.path().join(".berth").join("config.json"), "{not json").unwrap();

        let err = registry.start(request("t1", &dir)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidJson);
        assert_eq!(engine.total_calls(), 0);
    }
}
