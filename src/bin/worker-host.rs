//! # Worker Host Runner
//!
//! Connects to RabbitMQ, creates the requested workers and serves them until
//! Ctrl-C, then removes every worker and closes the connection.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use worker_host::config::{ConfigLoader, WorkerHostConfig};
use worker_host::execution::LogicLoader;
use worker_host::logging::init_structured_logging;
use worker_host::messaging::providers::RabbitMqBroker;
use worker_host::WorkerLifecycleManager;

#[derive(Parser, Debug)]
#[command(name = "worker-host")]
#[command(about = "Dynamic pool of broker-bound workers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect to the broker and serve workers until interrupted
    Run {
        /// Configuration file (TOML, YAML or JSON); falls back to WORKER_HOST_CONFIG_PATH
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Worker identities to create at startup
        #[arg(short, long = "worker", value_name = "ID")]
        workers: Vec<String>,
    },

    /// Load and validate configuration, then print it as JSON
    ValidateConfig {
        /// Configuration file (TOML, YAML or JSON); falls back to WORKER_HOST_CONFIG_PATH
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, workers } => run(config, workers).await,
        Commands::ValidateConfig { config } => validate_config(config),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<WorkerHostConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new().with_file(path),
        None => ConfigLoader::from_env(),
    };
    loader.load().context("Failed to load worker host configuration")
}

fn validate_config(path: Option<PathBuf>) -> Result<()> {
    let config = load_config(path)?.redacted();
    let rendered =
        serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}

async fn run(path: Option<PathBuf>, workers: Vec<String>) -> Result<()> {
    init_structured_logging();

    let config = Arc::new(load_config(path)?);
    let broker = Arc::new(
        RabbitMqBroker::connect(&config.broker)
            .await
            .context("Failed to connect to RabbitMQ")?,
    );

    let manager = WorkerLifecycleManager::new(
        Arc::clone(&config),
        broker.clone(),
        Arc::new(LogicLoader::with_builtins()),
    );

    for id in &workers {
        match manager.create_worker(id).await {
            Ok(info) => info!(worker_id = %info.identity, mode = %info.mode, "Worker started"),
            Err(e) => error!(worker_id = %id, error = %e, "Worker failed to start"),
        }
    }

    info!(
        workers = manager.worker_count(),
        broker = %broker.url_redacted(),
        "Worker host running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received");
    let removed = manager.shutdown().await;
    info!(removed, "All workers removed");

    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker connection did not close cleanly");
    }

    Ok(())
}
