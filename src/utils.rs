// utils.rs
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Formatted logs filtered by `RUST_LOG`, defaulting to `info` with quieter broker internals.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lapin=warn,tower_http=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
