use anyhow::Result;
use copier_status_relay::bootstrap;

#[tokio::main]
async fn main() -> Result<()> {
    // Bootstrap the application (config, logging, monitor task, API router)
    let app = bootstrap::setup().await?;

    let listener = tokio::net::TcpListener::bind(app.socket_addr).await?;
    tracing::info!("HTTP server listening on http://{}", app.bind_address);

    let shutdown_tx = app.shutdown_tx;
    let served = axum::serve(listener, app.router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
            // Ends event streams and stops the poll loop after its in-flight cycle
            let _ = shutdown_tx.send(true);
        })
        .await;

    // A dropped sender also stops the poll loop
    if let Err(e) = app.monitor_task.await {
        tracing::error!("Account monitor task failed: {}", e);
    }
    tracing::info!("Server stopped");

    drop(app.log_guard);
    served?;
    Ok(())
}
