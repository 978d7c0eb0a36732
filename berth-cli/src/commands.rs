//! CLI commands and their handlers.

use std::sync::Arc;

use anyhow::Result;
use clap::{Subcommand, ValueEnum};
use colored::*;
use serde_json::json;

use berth_core::domain::event::{RunEvent, RunEventPayload};
use berth_core::domain::run::RunMode;
use berth_core::dto::run::StartRunRequest;
use berth_runner::{DockerEngine, RandomPortAllocator, RunRegistry};

/// Run mode accepted on the command line.
#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Container,
    Host,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Container => RunMode::Container,
            ModeArg::Host => RunMode::Host,
        }
    }
}

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a run for a task checkout
    Start {
        /// Task identifier (used for the engine-side project name)
        task_id: String,
        /// Path to the task checkout
        path: String,

        /// Reuse a specific run id instead of generating one
        #[arg(long)]
        run_id: Option<String>,

        /// Execution mode
        #[arg(long, value_enum, default_value = "container")]
        mode: ModeArg,

        /// Suppress per-event output, print only the final result
        #[arg(short, long)]
        quiet: bool,
    },
    /// Stop whatever a task has running
    Stop {
        /// Task identifier
        task_id: String,
    },
    /// Report a task's current engine-side state
    Inspect {
        /// Task identifier
        task_id: String,
    },
    /// Resolve and print a task's run configuration
    Config {
        /// Path to the task checkout
        path: String,
    },
}

/// Routes a command to its handler.
pub async fn handle_command(command: Commands, raw_json: bool) -> Result<()> {
    let registry = RunRegistry::new(
        Arc::new(DockerEngine::new()),
        Arc::new(RandomPortAllocator::new()),
    );

    match command {
        Commands::Start {
            task_id,
            path,
            run_id,
            mode,
            quiet,
        } => start(&registry, task_id, path, run_id, mode, quiet, raw_json).await,
        Commands::Stop { task_id } => stop(&registry, &task_id).await,
        Commands::Inspect { task_id } => inspect(&registry, &task_id).await,
        Commands::Config { path } => print_config(&registry, &path),
    }
}

async fn start(
    registry: &Arc<RunRegistry>,
    task_id: String,
    path: String,
    run_id: Option<String>,
    mode: ModeArg,
    quiet: bool,
    raw_json: bool,
) -> Result<()> {
    if !quiet {
        registry.subscribe(move |event| print_event(event, raw_json));
    }

    let mut request = StartRunRequest::new(task_id, path);
    request.run_id = run_id;
    request.mode = Some(mode.into());

    match registry.start(request).await {
        Ok(started) => {
            println!(
                "{}",
                json!({
                    "ok": true,
                    "runId": started.run_id,
                    "sourcePath": started.source_path,
                })
            );
            Ok(())
        }
        Err(failure) => {
            println!("{}", json!({ "ok": false, "error": failure }));
            std::process::exit(1);
        }
    }
}

async fn stop(registry: &Arc<RunRegistry>, task_id: &str) -> Result<()> {
    match registry.stop(task_id).await {
        Ok(()) => {
            println!("{}", json!({ "ok": true }));
            Ok(())
        }
        Err(failure) => {
            println!("{}", json!({ "ok": false, "error": failure }));
            std::process::exit(1);
        }
    }
}

async fn inspect(registry: &Arc<RunRegistry>, task_id: &str) -> Result<()> {
    match registry.inspect(task_id).await {
        Ok(report) => {
            println!(
                "{}",
                json!({
                    "ok": true,
                    "running": report.running,
                    "ports": report.ports,
                    "previewService": report.preview_service,
                })
            );
            Ok(())
        }
        Err(failure) => {
            println!("{}", json!({ "ok": false, "error": failure }));
            std::process::exit(1);
        }
    }
}

fn print_config(registry: &Arc<RunRegistry>, path: &str) -> Result<()> {
    match registry.load_config(path) {
        Ok(loaded) => {
            println!(
                "{}",
                json!({
                    "ok": true,
                    "config": loaded.config,
                    "sourcePath": loaded.source_path,
                })
            );
            Ok(())
        }
        Err(failure) => {
            println!("{}", json!({ "ok": false, "error": failure }));
            std::process::exit(1);
        }
    }
}

/// Prints one run event as a formatted line, or raw JSON with `--json`.
fn print_event(event: &RunEvent, raw_json: bool) {
    if raw_json {
        if let Ok(line) = serde_json::to_string(event) {
            eprintln!("{line}");
        }
        return;
    }

    match &event.payload {
        RunEventPayload::Lifecycle {
            status,
            container_id,
        } => {
            let status = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            match container_id {
                Some(id) => eprintln!("{} {} ({})", "●".blue(), status.bold(), id.dimmed()),
                None => eprintln!("{} {}", "●".blue(), status.bold()),
            }
        }
        RunEventPayload::Ports {
            preview_service,
            ports,
        } => {
            for port in ports {
                let marker = if &port.service == preview_service {
                    "▶".green()
                } else {
                    "·".normal()
                };
                eprintln!(
                    "{} {} {} -> {}",
                    marker,
                    port.service.bold(),
                    port.container,
                    port.url.underline()
                );
            }
        }
        RunEventPayload::Error { code, message } => {
            eprintln!("{} {} {}", "✗".red(), code.to_string().red().bold(), message);
        }
        RunEventPayload::Result { status } => {
            let status = serde_json::to_value(status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            eprintln!("{} {}", "■".magenta(), status);
        }
    }
}
