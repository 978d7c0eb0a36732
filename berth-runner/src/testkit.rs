//! Shared test doubles for lifecycle and registry tests.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use berth_core::domain::config::PortRequest;
use berth_core::domain::event::RunEvent;
use berth_core::domain::ports::PortBinding;

use crate::engine::{ContainerEngine, EngineError, RunContainerSpec};
use crate::events::EventBus;
use crate::ports::{PortAllocError, PortAllocator};

/// Engine double that records every invocation by operation name.
pub struct MockEngine {
    pub calls: Mutex<Vec<String>>,
    pub compose_version_ok: bool,
    pub daemon_ok: bool,
    pub rendered: Option<Value>,
    pub ps_output: Option<String>,
    pub run_delay: Option<Duration>,
    pub fail_up: bool,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            compose_version_ok: true,
            daemon_ok: true,
            rendered: None,
            ps_output: None,
            run_delay: None,
            fail_up: false,
        }
    }
}

impl MockEngine {
    fn record(&self, op: &str) {
        self.calls.lock().unwrap().push(op.to_string());
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == op).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn compose_version(&self) -> Result<(), EngineError> {
        self.record("compose_version");
        if self.compose_version_ok {
            Ok(())
        } else {
            Err(EngineError::Unavailable("no compose plugin".to_string()))
        }
    }

    async fn daemon_ready(&self) -> Result<(), EngineError> {
        self.record("daemon_ready");
        if self.daemon_ok {
            Ok(())
        } else {
            Err(EngineError::Unavailable("daemon down".to_string()))
        }
    }

    async fn compose_render(&self, _file: &Path, _cwd: &Path) -> Result<Value, EngineError> {
        self.record("compose_render");
        self.rendered.clone().ok_or(EngineError::CommandFailed {
            op: "compose config",
            message: "no manifest".to_string(),
        })
    }

    async fn compose_up(
        &self,
        _project: &str,
        _files: &[PathBuf],
        _env_file: Option<&Path>,
        _cwd: &Path,
    ) -> Result<(), EngineError> {
        self.record("compose_up");
        if self.fail_up {
            Err(EngineError::CommandFailed {
                op: "compose up",
                message: "image pull failed".to_string(),
            })
        } else {
            Ok(())
        }
    }

    async fn compose_ps(&self, _project: &str) -> Result<String, EngineError> {
        self.record("compose_ps");
        Ok(self.ps_output.clone().unwrap_or_default())
    }

    async fn compose_down(&self, _project: &str) -> Result<(), EngineError> {
        self.record("compose_down");
        Ok(())
    }

    async fn run_detached(&self, _spec: &RunContainerSpec) -> Result<String, EngineError> {
        self.record("run_detached");
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        Ok("cid-0123456789ab".to_string())
    }

    async fn remove_container(&self, _name: &str) -> Result<(), EngineError> {
        self.record("remove_container");
        Ok(())
    }
}

/// Allocator double handing out sequential ports starting at 50000.
#[derive(Default)]
pub struct SequentialAllocator {
    next: Mutex<u16>,
}

impl PortAllocator for SequentialAllocator {
    fn allocate(&self, requests: &[PortRequest]) -> Result<Vec<PortBinding>, PortAllocError> {
        let mut next = self.next.lock().unwrap();
        let mut bindings = Vec::with_capacity(requests.len());
        for request in requests {
            bindings.push(PortBinding::new(
                request.service.clone(),
                request.container,
                50000 + *next,
            ));
            *next += 1;
        }
        Ok(bindings)
    }
}

/// Allocator double that always fails.
pub struct FailingAllocator;

impl PortAllocator for FailingAllocator {
    fn allocate(&self, _requests: &[PortRequest]) -> Result<Vec<PortBinding>, PortAllocError> {
        Err(PortAllocError {
            message: "unable to allocate a free host port".to_string(),
        })
    }
}

/// Subscribes a collector to the bus and returns the shared event vec.
pub fn capture_events(bus: &EventBus) -> Arc<Mutex<Vec<RunEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    events
}
