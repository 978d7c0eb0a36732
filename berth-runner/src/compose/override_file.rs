//! Port override fragment
//!
//! Renders the allocated host bindings as a minimal compose fragment that
//! is layered on top of the sanitized manifest at `up` time. Services are
//! emitted in sorted order so the artifact is byte-stable across runs with
//! the same allocations.

use std::collections::BTreeMap;

use berth_core::domain::ports::PortBinding;

/// Builds the YAML override fragment publishing each allocated binding.
pub fn build_override_yaml(bindings: &[PortBinding]) -> String {
    let mut by_service: BTreeMap<&str, Vec<&PortBinding>> = BTreeMap::new();
    for binding in bindings {
        by_service
            .entry(binding.service.as_str())
            .or_default()
            .push(binding);
    }

    let mut lines = vec!["services:".to_string()];
    for (service, ports) in by_service {
        lines.push(format!("  {service}:"));
        lines.push("    ports:".to_string());
        for binding in ports {
            lines.push("      -".to_string());
            lines.push(format!("        target: {}", binding.container));
            lines.push(format!("        published: {}", binding.host));
            lines.push("        protocol: tcp".to_string());
        }
    }

    lines.join("\n") + "\n"
}
