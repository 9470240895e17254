use anyhow::Result;
use std::net::SocketAddr;
use tracing_appender::non_blocking::WorkerGuard;

use crate::adapters::inbound::http::{create_router, AppState};
use crate::bootstrap::{services::ServiceRegistry, Application};

pub async fn setup(
    config: crate::config::Config,
    registry: ServiceRegistry,
    log_guard: Option<WorkerGuard>,
) -> Result<Application> {
    let server_address = config.server_address();
    tracing::info!("Server will listen on: {}", server_address);

    let allowed_origins = config.cors.allowed_origins.clone();
    let cors_disabled = config.cors.disable;

    let app_state = AppState {
        monitor: registry.monitor,
        broadcaster: registry.broadcaster,
        shutdown: registry.shutdown_rx,
        allowed_origins: allowed_origins.clone(),
        cors_disabled,
    };

    if cors_disabled {
        tracing::warn!("CORS is DISABLED in config - all origins will be allowed!");
    } else {
        tracing::info!("API state created with CORS origins: {:?}", allowed_origins);
    }

    let app = create_router(app_state);
    tracing::info!("API router built");

    let socket_addr: SocketAddr = server_address
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {}", server_address, e))?;

    Ok(Application {
        router: app,
        bind_address: server_address,
        socket_addr,
        shutdown_tx: registry.shutdown_tx,
        monitor_task: registry.monitor_task,
        log_guard,
    })
}
