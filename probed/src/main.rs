//! probed - probe metrics ingestion daemon
//!
//! Opens (and if needed creates or upgrades) the probe database, then
//! serves the metric ingestion API until interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use probedb::config::{StoreConfig, TomlConfig};
use probed::{build_router, AppState};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for probed
#[derive(Parser, Debug)]
#[command(name = "probed")]
#[command(about = "Beacon chain probe metrics daemon")]
#[command(version)]
struct Args {
    /// SQLite database file (overrides PROBED_DATABASE and the config file)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// TOML config file [default: ~/.config/probed/config.toml]
    #[arg(short, long, env = "PROBED_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = "PROBED_LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG is used when unset
    #[arg(long, env = "PROBED_LOG_LEVEL")]
    log_level: Option<String>,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(format!(
            "probed={level},probedb={level},tower_http={level}"
        )),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "probed=info,probedb=info".into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    info!("Starting probed v{}", env!("CARGO_PKG_VERSION"));

    let toml = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let store_config = StoreConfig::resolve(args.database.as_deref(), &toml)
        .context("Failed to resolve database configuration")?;
    info!("Database path: {}", store_config.database.display());

    // A failed migration leaves the database untouched; refuse to serve
    let db = probedb::init_database(&store_config)
        .await
        .context("Failed to initialize database")?;

    let app = build_router(AppState::new(db));

    let listen_address = args.listen_address.unwrap_or(toml.listen_address);
    let listener = tokio::net::TcpListener::bind(&listen_address)
        .await
        .with_context(|| format!("Failed to bind to {}", listen_address))?;
    info!("probed listening on {}", listen_address);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
