//! mdm-hub - Master-data consolidation service
//!
//! Loads configuration, builds the backend pool and pipeline, and serves the
//! HTTP API until Ctrl+C / SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info};

use mdm_hub::config::HubConfig;
use mdm_hub::{build_router, AppState};

/// Command-line arguments for mdm-hub
#[derive(Parser, Debug)]
#[command(name = "mdm-hub")]
#[command(about = "Customer master-data normalization and deduplication service")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "MDM_HUB_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = HubConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    mdm_common::logging::init_tracing(&config.logging).context("Failed to initialize logging")?;

    info!("Starting mdm-hub v{}", env!("CARGO_PKG_VERSION"));
    info!(
        endpoints = ?config.inference.endpoints,
        model_normalize = %config.inference.model_normalize,
        model_address = %config.inference.model_address,
        postal_lookup = config.postal.enabled,
        "Inference configuration"
    );

    let state = AppState::from_config(config).context("Failed to initialize service")?;
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
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

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
