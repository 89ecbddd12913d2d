//! canopyd: the Canopy daemon.
//!
//! Single binary that assembles the release controller:
//! - Release store (redb)
//! - Plugin registry + state machine provider
//! - Admission gate
//! - REST API + Prometheus metrics
//!
//! # Usage
//!
//! ```text
//! canopyd run --config /etc/canopy/canopy.toml --port 9443 --data-dir /var/lib/canopy
//! ```
//!
//! # Plugins
//!
//! Only the built-in `canary` strategy and `log` webhook ship with Canopy.
//! Releaser, runtime and monitor plugins for a given mesh, platform and
//! metrics backend are registered in [`plugin_registry`]; until they are,
//! every submitted release is rejected with an unknown plugin error.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use canopy_engine::{AdmissionGate, PluginRegistry, Provider, ReleaseController};
use canopy_state::{ReleaseStore, Store};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DaemonConfig, LogFormat};

const DEFAULT_LOG_FILTER: &str = "info,canopy=debug";

#[derive(Parser)]
#[command(name = "canopyd", about = "Canopy release controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the release controller and its API server.
    Run {
        /// Path to canopy.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
        } => {
            let mut config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                config.listen_port = port;
            }
            if let Some(data_dir) = data_dir {
                config.data_dir = data_dir;
            }

            init_tracing(&config)?;
            run(config).await
        }
    }
}

fn init_tracing(config: &DaemonConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

/// Plugins available to releases. Mesh, runtime and monitor integrations
/// register here alongside the built-ins.
fn plugin_registry() -> PluginRegistry {
    PluginRegistry::with_builtins()
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    info!("Canopy daemon starting");

    let settings = config.engine_settings()?;

    // Ensure data directory exists.
    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = config.data_dir.join("canopy.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store: Arc<dyn Store> = Arc::new(ReleaseStore::open(&db_path)?);
    info!(path = ?db_path, "release store opened");

    let registry = plugin_registry();
    info!(?registry, "plugin registry initialized");
    let missing = registry.missing_capabilities();
    if !missing.is_empty() {
        warn!(?missing, "no plugins registered for required capabilities, releases will be rejected");
    }

    let provider = Arc::new(Provider::new(registry, store, settings));
    let controller = Arc::new(ReleaseController::new(provider.clone()));
    let admission = Arc::new(AdmissionGate::new(provider));

    let resumed = controller.rehydrate()?;
    info!(releases = resumed, ?settings, "release controller initialized");

    // ── Start API server ───────────────────────────────────────

    let router = canopy_api::build_router(controller, admission);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "unable to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Canopy daemon stopped");
    Ok(())
}
