use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::service::{Backends, EventCore};

use super::routes::EventCoreServer;

const LOG_TARGET: &str = "server::bootstrap";

pub struct ServerConfig {
    pub bind: SocketAddr,
    pub database_url: String,
    pub redis_url: String,
    pub core: CoreConfig,
}

/// Connect the backends, start the hand materializer and serve HTTP until
/// ctrl-c. The HTTP server stops first, then the materializer finishes its
/// batch in flight.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let backends = Backends::connect(&config.database_url, &config.redis_url).await?;
    let EventCore {
        service,
        materializer,
    } = EventCore::assemble(backends, &config.core);

    let materializer_task = Arc::clone(&materializer).start();

    let router = EventCoreServer::new(service).into_router();
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let local_addr = listener.local_addr()?;
    info!(
        target: LOG_TARGET,
        %local_addr,
        stream_prefix = %config.core.stream.prefix,
        consumer = %config.core.materializer.consumer,
        "event core server listening"
    );

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error");

    info!(target: LOG_TARGET, "stopping hand materializer");
    materializer_task.shutdown().await;
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: LOG_TARGET, error = %err, "failed to install ctrl-c handler");
    }
    info!(target: LOG_TARGET, "shutdown signal received");
}
