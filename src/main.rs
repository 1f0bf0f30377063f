// main.rs
mod broker;
mod commands;
mod config;
mod devices;
mod docs;
mod error;
mod handlers;
mod metrics;
mod models;
mod utils;

use broker::{AmqpConnector, Publisher};
use commands::Dispatcher;
use devices::{BulbStateStore, Catalog};
use models::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let settings = config::Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        metrics::setup_metrics(settings.metrics.port)
            .map_err(|e| anyhow::anyhow!("Failed to setup metrics: {}", e))?;
        tracing::info!(port = settings.metrics.port, "Prometheus exporter listening");
    }

    let initial = settings
        .state
        .initial_state()
        .map_err(|e| anyhow::anyhow!("Invalid default bulb state: {}", e))?;

    let catalog = Arc::new(
        Catalog::new(settings.bulbs, settings.houses)
            .map_err(|e| anyhow::anyhow!("Invalid bulb configuration: {}", e))?,
    );
    let store = Arc::new(BulbStateStore::new(
        catalog.bulbs().iter().map(|bulb| bulb.id),
        &initial,
    ));

    let publisher = Arc::new(Publisher::new(
        AmqpConnector::new(&settings.broker),
        &settings.broker.queue_prefix,
        catalog.house_ids(),
        settings.broker.connect_timeout(),
    ));
    if let Err(err) = publisher.connect().await {
        tracing::warn!(error = %err, "Starting without a broker connection, will retry on first publish");
    }

    let dispatcher = Dispatcher::new(
        Arc::clone(&catalog),
        Arc::clone(&publisher),
        Arc::clone(&store),
        settings.state.update_policy,
    );
    let state = Arc::new(AppState::new(catalog, store, publisher, dispatcher));
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
