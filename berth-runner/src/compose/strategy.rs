//! Start strategy detection
//!
//! A task checkout carrying a compose manifest at its root is started as a
//! multi-service stack; anything else gets a single directly-run container.

use std::path::{Path, PathBuf};

/// Manifest file names probed at the checkout root, in precedence order.
const COMPOSE_FILE_NAMES: [&str; 4] = [
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

/// Returns the first compose manifest found at the checkout root, if any.
pub fn find_compose_file(task_path: &Path) -> Option<PathBuf> {
    COMPOSE_FILE_NAMES
        .iter()
        .map(|name| task_path.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_no_manifest_means_direct_strategy() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_compose_file(dir.path()).is_none());
    }

    #[test]
    fn test_finds_manifest_by_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("compose.yaml"), "services: {}\n").unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "services: {}\n").unwrap();

        let found = find_compose_file(dir.path()).unwrap();
        assert_eq!(found, dir.path().join("docker-compose.yml"));
    }

    #[test]
    fn test_directory_with_manifest_name_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("compose.yml")).unwrap();
        assert!(find_compose_file(dir.path()).is_none());
    }
}
