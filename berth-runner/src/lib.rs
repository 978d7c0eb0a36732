//! Berth Runner
//!
//! Orchestrates ephemeral dev-server containers for per-task code checkouts.
//!
//! Architecture:
//! - Config: load and validate per-task run configuration
//! - Ports: allocate collision-free host ports for declared services
//! - Compose: probe, analyze, and rewrite multi-service manifests
//! - Engine: drive the external container engine with timeouts
//! - Lifecycle: execute the compose/direct/mock start sequences
//! - Registry: public start/stop/inspect surface with per-task dedup
//! - Events: synchronous typed event fan-out to UI listeners
//!
//! The registry guarantees at most one concurrent run per task: a second
//! `start` while one is in flight joins the pending outcome instead of
//! issuing another engine invocation.

pub mod compose;
pub mod config;
pub mod engine;
pub mod events;
pub mod lifecycle;
pub mod ports;
pub mod preview;
pub mod registry;

pub use engine::{ContainerEngine, DockerEngine, EngineError, RunContainerSpec};
pub use events::{EventBus, SubscriptionId};
pub use lifecycle::LifecycleDriver;
pub use ports::{PortAllocError, PortAllocator, RandomPortAllocator};
pub use registry::RunRegistry;

#[cfg(test)]
pub(crate) mod testkit;
