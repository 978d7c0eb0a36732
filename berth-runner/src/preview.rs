//! Preview service selection
//!
//! Picks which service's URL should be surfaced as the primary preview.
//! Selection is tiered: an explicit flag always wins, then well-known
//! frontend service names, then well-known dev-server ports, then the
//! first declared entry.

use berth_core::domain::config::{PortRequest, DEFAULT_PREVIEW_SERVICE};
use berth_core::domain::ports::PortBinding;

/// Service names that usually front a web UI, in priority order.
const PREVIEW_SERVICE_NAMES: [&str; 4] = ["web", "app", "frontend", "ui"];

/// Container ports that usually carry a dev server, in priority order.
const PREVIEW_PORTS: [u16; 4] = [3000, 5173, 8080, 8000];

/// Selects the preview service among declared port requests.
///
/// An explicitly flagged request wins outright; otherwise falls through
/// the name and port tiers, then the first entry. An empty request set
/// yields the default service name.
pub fn select_preview(requests: &[PortRequest]) -> String {
    if let Some(flagged) = requests.iter().find(|request| request.preview) {
        return flagged.service.clone();
    }
    for name in PREVIEW_SERVICE_NAMES {
        if let Some(request) = requests.iter().find(|request| request.service == name) {
            return request.service.clone();
        }
    }
    for port in PREVIEW_PORTS {
        if let Some(request) = requests.iter().find(|request| request.container == port) {
            return request.service.clone();
        }
    }
    requests
        .first()
        .map(|request| request.service.clone())
        .unwrap_or_else(|| DEFAULT_PREVIEW_SERVICE.to_string())
}

/// Selects the preview service among already-published bindings, used
/// when inspecting a running stack where no request flags survive.
pub fn select_preview_published(bindings: &[PortBinding]) -> Option<String> {
    for name in PREVIEW_SERVICE_NAMES {
        if let Some(binding) = bindings.iter().find(|binding| binding.service == name) {
            return Some(binding.service.clone());
        }
    }
    for port in PREVIEW_PORTS {
        if let Some(binding) = bindings.iter().find(|binding| binding.container == port) {
            return Some(binding.service.clone());
        }
    }
    bindings.first().map(|binding| binding.service.clone())
}
