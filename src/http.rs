//! HTTP server for Prometheus metrics and read-only topology views.
//!
//! Runs on a separate tokio task and serves `/metrics` for Prometheus
//! scraping, plus `/map` and `/links` for operators.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, routing::get};

use crate::sync::SyncManager;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Handler for GET /map - the server tree with user counts.
async fn map_handler(State(manager): State<Arc<SyncManager>>) -> String {
    let mut out = manager.map().join("\n");
    out.push('\n');
    out
}

/// Handler for GET /links - one `name uplink :hops description` row per server.
async fn links_handler(State(manager): State<Arc<SyncManager>>) -> String {
    manager
        .links()
        .into_iter()
        .map(|l| format!("{} {} :{} {}\n", l.name, l.uplink, l.hopcount, l.description))
        .collect()
}

pub fn router(manager: Arc<SyncManager>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/map", get(map_handler))
        .route("/links", get(links_handler))
        .with_state(manager)
}

/// Run the HTTP server.
///
/// Binds to `0.0.0.0:port` and stops when the manager shuts down.
/// This is a long-running task that should be spawned in the background.
pub async fn run_http_server(port: u16, manager: Arc<SyncManager>) {
    let shutdown = manager.shutdown_token().clone();
    let app = router(manager);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };
    tracing::info!(address = %addr, "HTTP server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "HTTP server error");
    }
}
