//! # safewalk-server
//!
//! HTTP server for the safewalk personal-safety alert service.
//!
//! This binary provides:
//! - The alert countdown, armed on startup
//! - The trigger peripheral session (BlueZ, or a simulated device)
//! - REST API with OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, without Bluetooth hardware
//! cargo run --package safewalk-server --no-default-features --features mock-bluetooth
//!
//! # Production
//! SAFEWALK_ENV=production ./safewalk-server
//! ```
//!
//! The configuration file is read from `SAFEWALK_CONFIG` when set, otherwise
//! from the platform default (`/etc/safewalk/config.toml` on Linux).

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use safewalk_core::config::default_config_path;
use safewalk_core::Config;
use safewalk_server::state::AppState;
use safewalk_server::{api, logging};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    let config_path = std::env::var_os("SAFEWALK_CONFIG")
        .map_or_else(default_config_path, PathBuf::from);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        countdown_seconds = config.countdown.total_seconds,
        "Starting safewalk-server"
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .context("parsing server.bind_address")?;
    let state = AppState::from_config(config).await?;
    let app = api::create_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("safewalk-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
