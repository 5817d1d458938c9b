//! rotorwatch - fault classification service
//!
//! Loads the trained weights and class registry once, then serves
//! `POST /predict-real-time` until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! rotorwatch                          # ./rotorwatch.toml or built-in defaults
//! rotorwatch --config site.toml --addr 127.0.0.1:9000
//! RUST_LOG=debug rotorwatch --log-json
//! ```
//!
//! # Environment Variables
//!
//! - `ROTORWATCH_CONFIG`: Path to the TOML config file
//! - `ROTORWATCH_ADDR`: Bind address override
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use rotorwatch::api::{create_app, ServeState};
use rotorwatch::{AppConfig, InferenceEngine};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "rotorwatch")]
#[command(about = "Rotating-machinery fault classification service")]
#[command(version)]
struct CliArgs {
    /// Config file (otherwise ROTORWATCH_CONFIG, then ./rotorwatch.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the server address (default: "0.0.0.0:8001")
    #[arg(short, long)]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    rotorwatch::init_tracing(args.log_json);

    let config = AppConfig::load_or_default_search(args.config.as_deref())
        .context("Failed to load config")?;
    let server_addr = args.addr.clone().unwrap_or_else(|| config.server_addr());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        weights = %config.model.weights_path.display(),
        registry = %config.model.registry_path.display(),
        "Starting rotorwatch"
    );

    // Everything that can fail at startup fails here, before binding.
    let engine = InferenceEngine::load(&config.model).context("Failed to load model")?;
    info!(
        classes = ?engine.registry().names(),
        expected_samples = engine.expected_samples(),
        "Model loaded"
    );

    let app = create_app(ServeState::new(engine), &config.server);
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", server_addr))?;
    info!("HTTP server listening on {}", server_addr);

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel_token.cancelled().await;
        })
        .await
        .context("HTTP server error")?;

    info!("rotorwatch shutdown complete");
    Ok(())
}
