//! polyradar-api - PolyRadar analysis service
//!
//! Accepts Polymarket event URLs, fans them out to the analysis webhooks,
//! ingests their callbacks and serves live analysis views.

use anyhow::{Context, Result};
use clap::Parser;
use polyradar_common::config::{RootFolderInitializer, RootFolderResolver, TomlConfig};
use polyradar_common::db::init_database;
use polyradar_api::logging;
use polyradar_api::services::spawn_sweeper;
use polyradar_api::{build_router, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for polyradar-api
#[derive(Parser, Debug)]
#[command(name = "polyradar-api")]
#[command(about = "PolyRadar prediction-market analysis service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "POLYRADAR_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding the database
    #[arg(short, long, env = "POLYRADAR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long, env = "POLYRADAR_BIND")]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "POLYRADAR_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Tracing first so config resolution is logged
    let rust_log = std::env::var("RUST_LOG").ok();
    let (filter, log_level) = logging::filter_layer(rust_log.as_deref());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;
    log_level.apply_configured(&config.logging.level);

    info!(
        "Starting PolyRadar API (polyradar-api) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate().context("Invalid configuration")?;

    let root_folder = RootFolderResolver::new("polyradar-api")
        .with_cli_arg(args.root_folder)
        .with_toml_value(config.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db = init_database(&db_path)
        .await
        .context("Failed to open database")?;

    info!(
        models = ?config.model_names(),
        public_url = %config.server.public_base_url,
        webhook_auth = config.webhooks.shared_secret.is_some(),
        "Webhook fan-out configured"
    );

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let state = AppState::new(db, config).context("Failed to build application state")?;

    let shutdown = CancellationToken::new();
    let sweeper = spawn_sweeper(
        state.db.clone(),
        Arc::clone(&state.event_bus),
        state.config.sweep_interval(),
        state.config.result_timeout(),
        shutdown.clone(),
    );

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Sweeper task ended abnormally");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
