//! Host/container port bindings

use serde::{Deserialize, Serialize};

/// A concrete mapping of one declared container port onto a host port.
///
/// Produced by the port allocator for a single run; never persisted beyond
/// that run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub service: String,
    pub protocol: String,
    pub container: u16,
    pub host: u16,
}

impl PortBinding {
    pub fn new(service: impl Into<String>, container: u16, host: u16) -> Self {
        Self {
            service: service.into(),
            protocol: "tcp".to_string(),
            container,
            host,
        }
    }

    /// Browser-reachable URL for this binding on the local host.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.host)
    }
}
