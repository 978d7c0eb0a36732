//! Rendered manifest analysis
//!
//! Works on the JSON form produced by `compose config --format json`, which
//! normalizes most authoring variants but still leaves both long-form port
//! mappings and short-form `"HOST:CONTAINER"` strings in place.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Map, Value};
use tracing::debug;

/// Extracts `(service, container_port)` pairs from a rendered manifest.
///
/// Long-form entries are honored when their protocol is tcp (or absent);
/// short-form strings are split on the last colon so `ip:host:container`
/// still yields the container port. Out-of-range and udp entries are
/// skipped. Pairs are deduplicated, preserving first-seen order.
pub fn discover_service_ports(rendered: &Value) -> Vec<(String, u16)> {
    let mut discovered = Vec::new();
    let mut seen = HashSet::new();

    let Some(services) = rendered.get("services").and_then(Value::as_object) else {
        return discovered;
    };

    for (service, definition) in services {
        let Some(ports) = definition.get("ports").and_then(Value::as_array) else {
            continue;
        };
        for entry in ports {
            let Some(port) = container_port_of(entry) else {
                continue;
            };
            if seen.insert((service.clone(), port)) {
                discovered.push((service.clone(), port));
            }
        }
    }

    debug!(count = discovered.len(), "discovered declared service ports");
    discovered
}

fn container_port_of(entry: &Value) -> Option<u16> {
    match entry {
        Value::Object(mapping) => {
            let protocol = mapping
                .get("protocol")
                .and_then(Value::as_str)
                .unwrap_or("tcp");
            if protocol != "tcp" {
                return None;
            }
            ["target", "TargetPort", "ContainerPort"]
                .iter()
                .find_map(|key| mapping.get(*key))
                .and_then(as_port)
        }
        Value::String(short) => {
            let spec = match short.split_once('/') {
                Some((spec, protocol)) => {
                    if protocol != "tcp" {
                        return None;
                    }
                    spec
                }
                None => short.as_str(),
            };
            let container = spec.rsplit(':').next().unwrap_or(spec);
            container.parse::<u16>().ok().filter(|port| *port >= 1)
        }
        Value::Number(_) => as_port(entry),
        _ => None,
    }
}

fn as_port(value: &Value) -> Option<u16> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .and_then(|raw| u16::try_from(raw).ok())
            .filter(|port| *port >= 1),
        Value::String(text) => text.parse::<u16>().ok().filter(|port| *port >= 1),
        _ => None,
    }
}

/// Rewrites a rendered manifest so no service publishes host ports itself.
///
/// Every `ports` section is removed; requested container ports for each
/// service are preserved as `expose` entries so inter-service reachability
/// survives. Existing `expose` values are kept, with numeric strings coerced
/// to numbers. Applying the rewrite twice is a no-op.
pub fn sanitize_rendered_config(
    rendered: &Value,
    requested: &HashMap<String, Vec<u16>>,
) -> Value {
    let mut sanitized = rendered.clone();

    let Some(services) = sanitized
        .get_mut("services")
        .and_then(Value::as_object_mut)
    else {
        return sanitized;
    };

    for (service, definition) in services.iter_mut() {
        let Some(definition) = definition.as_object_mut() else {
            continue;
        };

        let mut expose = Vec::new();
        let mut seen = HashSet::new();

        if let Some(existing) = definition.get("expose").and_then(Value::as_array) {
            for value in existing {
                if let Some(port) = as_port(value) {
                    if seen.insert(port) {
                        expose.push(port);
                    }
                }
            }
        }
        if let Some(ports) = requested.get(service.as_str()) {
            for port in ports {
                if seen.insert(*port) {
                    expose.push(*port);
                }
            }
        }

        definition.remove("ports");
        if !expose.is_empty() {
            definition.insert("expose".to_string(), json!(expose));
        } else {
            definition.remove("expose");
        }
    }

    sanitized
}
