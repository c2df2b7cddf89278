//! Prometheus exposition for flurry.
//!
//! Serves `/metrics` in the Prometheus text format and a `/health` probe.

use axum::{Extension, Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{MetricsError, PrometheusInitSnafu};

/// Install the Prometheus recorder and spawn the HTTP endpoint on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init(addr: SocketAddr) -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    tokio::spawn(run_server(addr, handle));

    Ok(())
}

async fn run_server(addr: SocketAddr, handle: PrometheusHandle) {
    let app = router(handle);

    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(%addr, "Metrics server listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Metrics server error");
    }
}

fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(Extension(handle))
}

async fn metrics_handler(Extension(handle): Extension<PrometheusHandle>) -> String {
    handle.render()
}

async fn health_handler() -> &'static str {
    "ok\n"
}
