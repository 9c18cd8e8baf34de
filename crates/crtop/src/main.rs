//! crtop - live registry backend for container runtime dashboards
//!
//! Selects a backend connector by key, keeps its container registry
//! current, and serves health, Prometheus metrics and registry snapshots.

use anyhow::Result;
use clap::Parser;
use crtop_lib::{
    by_name, enabled,
    health::{components, HealthRegistry},
    observability::StructuredLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod render;

const CRTOP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line flags; each one overrides the matching `CRTOP_*` setting
#[derive(Debug, Parser)]
#[command(name = "crtop", version, about = "Live container registry for runtime dashboards")]
struct Args {
    /// Container connector to use
    #[arg(short, long, env = "CRTOP_CONNECTOR")]
    connector: Option<String>,

    /// Port for the health/metrics/snapshot API
    #[arg(long)]
    api_port: Option<u16>,

    /// Only show containers whose name contains this substring
    #[arg(short, long)]
    filter: Option<String>,

    /// Show containers in every state
    #[arg(short, long, conflicts_with = "running_only")]
    all: bool,

    /// Only show running containers
    #[arg(long)]
    running_only: bool,

    /// Print the available connectors and exit
    #[arg(long)]
    list_connectors: bool,
}

impl Args {
    fn apply(&self, config: &mut config::AppConfig) {
        if let Some(connector) = &self.connector {
            config.connector = connector.clone();
        }
        if let Some(port) = self.api_port {
            config.api_port = port;
        }
        if let Some(filter) = &self.filter {
            config.filter = filter.clone();
        }
        if self.all {
            config.all_containers = true;
        }
        if self.running_only {
            config.all_containers = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();
    if args.list_connectors {
        for key in enabled() {
            println!("{key}");
        }
        return Ok(());
    }

    let mut config = config::AppConfig::load()?;
    args.apply(&mut config);
    info!(connector = %config.connector, "Starting crtop");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::API).await;

    let logger = StructuredLogger::new(&config.connector);

    let connector = match by_name(
        &config.connector,
        &config.connector_config(),
        &health_registry,
    ) {
        Ok(connector) => connector,
        Err(e) => {
            error!(error = %e, "Failed to initialize connector");
            return Err(e.into());
        }
    };
    logger.log_startup(CRTOP_VERSION, config.api_port);

    // Start health, metrics and snapshot server
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&connector),
    ));
    let api_health = health_registry.clone();
    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
            api_health
                .set_unhealthy(components::API, e.to_string())
                .await;
        }
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let render_handle = tokio::spawn(render::run(
        Arc::clone(&connector),
        Duration::from_millis(config.render_interval_ms.max(1)),
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    let _ = render_handle.await;
    connector.down().await;
    api_handle.abort();

    Ok(())
}
