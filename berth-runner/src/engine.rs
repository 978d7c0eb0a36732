//! Container engine abstraction
//!
//! Wraps the external `docker` binary behind a trait so lifecycle logic can
//! be exercised without a daemon. Every invocation carries a timeout:
//! probes stay in seconds, image pulls and builds get minutes. A timed-out
//! call surfaces as an error, never a hang.
//!
//! Command failures prefer the engine's own stderr (then stdout) as the
//! error message, since generic wrapper text is not actionable.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use berth_core::domain::ports::PortBinding;

/// Timeout for cheap probes: version/info checks, state listings, and
/// manifest rendering.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for container start operations, including image pulls.
const START_TIMEOUT: Duration = Duration::from_secs(600);

/// Timeout for teardown operations.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from driving the external container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be executed at all.
    #[error("container engine is not available: {0}")]
    Unavailable(String),

    /// The command did not complete within its deadline.
    #[error("`{op}` timed out after {timeout:?}")]
    TimedOut { op: &'static str, timeout: Duration },

    /// The command ran and exited unsuccessfully.
    #[error("{message}")]
    CommandFailed { op: &'static str, message: String },
}

impl EngineError {
    /// Builds a `CommandFailed` carrying the engine's own diagnostic:
    /// stderr if non-empty, else stdout, else a generic exit-status note.
    fn from_output(op: &'static str, output: &Output) -> Self {
        Self::command_failed(
            op,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
            output.status.to_string(),
        )
    }

    fn command_failed(op: &'static str, stderr: String, stdout: String, status: String) -> Self {
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            format!("`{op}` exited with {status}")
        };
        EngineError::CommandFailed { op, message }
    }
}

/// Everything needed to start a single dev container directly.
#[derive(Debug, Clone)]
pub struct RunContainerSpec {
    pub name: String,
    pub image: String,
    pub ports: Vec<PortBinding>,
    /// Host directory mounted read-write at `/workspace`.
    pub mount_source: PathBuf,
    /// Absolute working directory inside the container.
    pub workdir: String,
    pub env: Vec<(String, String)>,
    pub env_file: Option<PathBuf>,
    /// Shell line executed via `bash -lc`.
    pub command: String,
}

/// Operations the lifecycle driver needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Probes whether the compose plugin is usable.
    async fn compose_version(&self) -> Result<(), EngineError>;

    /// Probes whether the engine daemon responds.
    async fn daemon_ready(&self) -> Result<(), EngineError>;

    /// Renders the manifest (after interpolation/merging) as JSON.
    async fn compose_render(&self, compose_file: &Path, cwd: &Path) -> Result<Value, EngineError>;

    /// Starts the stack detached under the given project name. `files` are
    /// layered in order via repeated `-f`.
    async fn compose_up(
        &self,
        project: &str,
        files: &[PathBuf],
        env_file: Option<&Path>,
        cwd: &Path,
    ) -> Result<(), EngineError>;

    /// Raw JSON process-state listing for a project.
    async fn compose_ps(&self, project: &str) -> Result<String, EngineError>;

    /// Tears down a project's stack, removing volumes.
    async fn compose_down(&self, project: &str) -> Result<(), EngineError>;

    /// Runs a single container detached; returns the container id.
    async fn run_detached(&self, spec: &RunContainerSpec) -> Result<String, EngineError>;

    /// Force-removes a container by name.
    async fn remove_container(&self, name: &str) -> Result<(), EngineError>;
}

/// Production engine backed by the `docker` CLI.
pub struct DockerEngine {
    binary: String,
}

impl DockerEngine {
    pub fn new() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }

    /// Runs one engine command, enforcing the timeout and mapping failures.
    async fn run_checked(
        &self,
        op: &'static str,
        args: Vec<String>,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<Output, EngineError> {
        debug!(op, ?args, "invoking container engine");

        let mut command = Command::new(&self.binary);
        command.args(&args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| EngineError::TimedOut { op, timeout })?
            .map_err(|err| EngineError::Unavailable(err.to_string()))?;

        if !output.status.success() {
            return Err(EngineError::from_output(op, &output));
        }
        Ok(output)
    }
}

impl Default for DockerEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn compose_version(&self) -> Result<(), EngineError> {
        self.run_checked(
            "compose version",
            vec!["compose".into(), "version".into()],
            None,
            PROBE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn daemon_ready(&self) -> Result<(), EngineError> {
        self.run_checked(
            "engine info",
            vec![
                "info".into(),
                "--format".into(),
                "{{.ServerVersion}}".into(),
            ],
            None,
            PROBE_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn compose_render(&self, compose_file: &Path, cwd: &Path) -> Result<Value, EngineError> {
        let output = self
            .run_checked(
                "compose config",
                vec![
                    "compose".into(),
                    "-f".into(),
                    compose_file.to_string_lossy().into_owned(),
                    "config".into(),
                    "--format".into(),
                    "json".into(),
                ],
                Some(cwd),
                PROBE_TIMEOUT,
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        serde_json::from_str(&stdout).map_err(|err| EngineError::CommandFailed {
            op: "compose config",
            message: format!("unparsable rendered manifest: {err}"),
        })
    }

    async fn compose_up(
        &self,
        project: &str,
        files: &[PathBuf],
        env_file: Option<&Path>,
        cwd: &Path,
    ) -> Result<(), EngineError> {
        let mut args: Vec<String> = vec!["compose".into()];
        if let Some(env_file) = env_file {
            args.push("--env-file".into());
            args.push(env_file.to_string_lossy().into_owned());
        }
        args.push("-p".into());
        args.push(project.to_string());
        for file in files {
            args.push("-f".into());
            args.push(file.to_string_lossy().into_owned());
        }
        args.push("up".into());
        args.push("-d".into());

        self.run_checked("compose up", args, Some(cwd), START_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn compose_ps(&self, project: &str) -> Result<String, EngineError> {
        let output = self
            .run_checked(
                "compose ps",
                vec![
                    "compose".into(),
                    "-p".into(),
                    project.to_string(),
                    "ps".into(),
                    "--format".into(),
                    "json".into(),
                ],
                None,
                PROBE_TIMEOUT,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn compose_down(&self, project: &str) -> Result<(), EngineError> {
        self.run_checked(
            "compose down",
            vec![
                "compose".into(),
                "-p".into(),
                project.to_string(),
                "down".into(),
                "-v".into(),
            ],
            None,
            TEARDOWN_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    async fn run_detached(&self, spec: &RunContainerSpec) -> Result<String, EngineError> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            spec.name.clone(),
        ];
        for binding in &spec.ports {
            args.push("-p".into());
            args.push(format!("{}:{}", binding.host, binding.container));
        }
        args.push("-v".into());
        args.push(format!(
            "{}:/workspace",
            spec.mount_source.to_string_lossy()
        ));
        args.push("-w".into());
        args.push(spec.workdir.clone());
        for (key, value) in &spec.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        if let Some(env_file) = &spec.env_file {
            args.push("--env-file".into());
            args.push(env_file.to_string_lossy().into_owned());
        }
        args.push(spec.image.clone());
        args.push("bash".into());
        args.push("-lc".into());
        args.push(spec.command.clone());

        let output = self
            .run_checked(
                "container run",
                args,
                Some(&spec.mount_source),
                START_TIMEOUT,
            )
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn remove_container(&self, name: &str) -> Result<(), EngineError> {
        self.run_checked(
            "container rm",
            vec!["rm".into(), "-f".into(), name.to_string()],
            None,
            TEARDOWN_TIMEOUT,
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(stdout: &str, stderr: &str) -> EngineError {
        EngineError::command_failed(
            "compose up",
            stderr.to_string(),
            stdout.to_string(),
            "exit status: 1".to_string(),
        )
    }

    #[test]
    fn test_command_failure_prefers_stderr() {
        assert_eq!(failure("out", "boom").to_string(), "boom");
    }

    #[test]
    fn test_command_failure_falls_back_to_stdout() {
        assert_eq!(failure("only stdout", "").to_string(), "only stdout");
    }

    #[test]
    fn test_command_failure_reports_exit_when_silent() {
        let err = failure("", "");
        assert!(err.to_string().contains("compose up"));
        assert!(err.to_string().contains("exit status: 1"));
    }
}
