//! Compose manifest handling
//!
//! Strategy detection, rendered-manifest analysis, and the generated
//! artifacts (sanitized manifest plus port override fragment) that let a
//! checked-in compose file run with dynamically allocated host ports.

pub mod analyze;
pub mod override_file;
pub mod strategy;

pub use analyze::{discover_service_ports, sanitize_rendered_config};
pub use override_file::build_override_yaml;
pub use strategy::find_compose_file;
