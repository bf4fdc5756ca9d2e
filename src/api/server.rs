use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::routes::build_router;
use crate::{config::ServerConfig, errors::RouteplaneError, services::ConfigMerger};

/// Serve the API until `shutdown` is cancelled.
pub async fn start_api_server(
    config: &ServerConfig,
    merger: Arc<ConfigMerger>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| RouteplaneError::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        RouteplaneError::config(format!("Failed to bind API server on {}: {}", addr, e))
    })?;

    info!(address = %addr, "Starting HTTP API server");
    axum::serve(listener, build_router(merger))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| RouteplaneError::internal(format!("API server error: {}", e)))?;

    info!("API server shutdown completed");
    Ok(())
}
