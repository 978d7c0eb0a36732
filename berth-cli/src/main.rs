//! Berth CLI
//!
//! Command-line interface for starting, stopping, and inspecting per-task
//! dev-server containers.

mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use commands::{handle_command, Commands};

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Ephemeral dev-server containers for task checkouts", long_about = None)]
struct Cli {
    /// Print raw event JSON instead of formatted lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "berth=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    handle_command(cli.command, cli.json).await
}
