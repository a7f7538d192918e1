//! playclockd - the session countdown service
//!
//! This is the main entry point for the playclockd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization
//! - Session engine and expiry scheduler
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use playclock_config::load_config;
use playclock_store::SqliteStore;
use playclock_util::{default_config_path, Clock, SystemClock};
use playclockd::service::Service;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// playclockd - Session countdown service for pay-per-time gaming terminals
#[derive(Parser, Debug)]
#[command(name = "playclockd")]
#[command(about = "Session countdown service for pay-per-time gaming terminals", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/playclockd/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set PLAYCLOCK_SOCKET env var)
    #[arg(short, long, env = "PLAYCLOCK_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set PLAYCLOCK_DATA_DIR env var)
    #[arg(short, long, env = "PLAYCLOCK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "playclockd starting");

    // Load configuration
    let mut config = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    info!(
        config_path = %args.config.display(),
        device_count = config.devices.len(),
        "Configuration loaded"
    );

    // Command line and environment override the config file
    if let Some(socket) = args.socket.clone() {
        config.service.socket_path = socket;
    }
    if let Some(data_dir) = args.data_dir.clone() {
        config.service.data_dir = data_dir;
    }

    // Create data directory
    std::fs::create_dir_all(&config.service.data_dir).with_context(|| {
        format!(
            "Failed to create data directory {:?}",
            config.service.data_dir
        )
    })?;

    // Initialize store
    let db_path = config.service.data_dir.join("playclockd.db");
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {:?}", db_path))?,
    );

    info!(db_path = %db_path.display(), "Store initialized");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let service = Arc::new(Service::new(&config, store, clock).await?);
    let tasks = service.clone().start().await?;

    // Wait for a termination signal
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
        _ = sighup.recv() => info!("Received SIGHUP, shutting down gracefully"),
    }

    service.stop(tasks).await;
    Ok(())
}
