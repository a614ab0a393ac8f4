//! Entry point for the `nimbus-gateway` HTTP server.

use std::sync::Arc;

use nimbus_executor::{ProcessBackend, VmLifecycleManager};
use nimbus_gateway::{
    config::GatewayConfig,
    routes::{create_router, AppState},
};
use nimbus_storage::{BlobStore, EdgeCache};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        worker = %config.worker.program.display(),
        sample_interval_ms = config.worker.sample_interval.as_millis(),
        stop_timeout_ms = config.worker.stop_timeout.as_millis(),
        "worker configuration"
    );

    let manager = Arc::new(VmLifecycleManager::new(ProcessBackend::new(config.worker)));
    let state = AppState::new(
        Arc::clone(&manager),
        BlobStore::new(config.storage_root),
        EdgeCache::new(config.cdn_root),
    );
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %config.listen_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %config.listen_addr, "nimbus-gateway listening");

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    let stopped = manager.shutdown().await;
    info!(stopped, "all VMs stopped, exiting");

    if let Err(e) = served {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        // Without a signal handler the server runs until killed.
        std::future::pending::<()>().await;
    }
    info!("ctrl-c received, shutting down");
}
