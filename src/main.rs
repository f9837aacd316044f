//! slircd-link - Straylight IRC Daemon server linking.
//!
//! Loads the link configuration, starts the metrics endpoint and runs the
//! link manager until interrupted.

use std::sync::Arc;
use std::time::Duration;

use slircd_link::config::{Config, validation};
use slircd_link::{NetworkState, SyncManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {}",
            errors.len(),
            config_path
        ));
    }

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        links = config.links.len(),
        "Starting slircd-link"
    );

    slircd_link::metrics::init();
    let metrics_port = config.server.metrics_port;

    let manager = SyncManager::new(config, Arc::new(NetworkState::new()));

    if let Some(port) = metrics_port {
        tokio::spawn(slircd_link::http::run_http_server(port, Arc::clone(&manager)));
    }

    let signal_manager = Arc::clone(&manager);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received interrupt, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for interrupt"),
        }
        signal_manager.shutdown();
    });

    Arc::clone(&manager).run().await?;

    // Give link tasks a moment to deliver their ERROR lines.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !manager.peers().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    info!("Shutdown complete");
    Ok(())
}
