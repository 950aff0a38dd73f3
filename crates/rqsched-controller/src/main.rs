//! rqschedd — the rqsched daemon.
//!
//! Loads the controller config, places the configured tasks on their run
//! queues and runs the optimizer poll loop until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! rqschedd run --config /etc/rqsched/rqsched.toml
//! rqschedd scaffold > rqsched.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use rqsched_controller::Daemon;
use rqsched_core::ControllerConfig;

#[derive(Parser)]
#[command(name = "rqschedd", about = "Real-time scheduling optimizer daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and the optimizer poll loop.
    Run {
        /// Path to the controller config file.
        #[arg(long, short, default_value = "rqsched.toml")]
        config: PathBuf,
    },
    /// Print a minimal config file to stdout.
    Scaffold,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,rqschedd=debug,rqsched=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Scaffold => {
            print!("{}", ControllerConfig::scaffold().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ControllerConfig::from_file(&config_path)?;
    info!(path = ?config_path, tasks = config.tasks.len(), "config loaded");

    let daemon = Daemon::from_config(&config)?;
    daemon.allocate_configured(&config).await;

    daemon.optimizer().start_optimizing().await;
    info!(
        goal = ?config.goal.goal,
        interval_ms = config.goal.query_intervall_ms,
        "rqschedd running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let ended = daemon.shutdown().await;
    let remaining = daemon.optimizer().task_names().await;
    info!(
        ended = %serde_json::to_string(&ended)?,
        remaining = remaining.len(),
        "rqschedd stopped"
    );
    Ok(())
}
