//! Herald API server binary entrypoint.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_engine::store::ProjectStore;
use herald_notifier::{BackoffPolicy, DeliveryQueue, DeliveryWorker, MatrixClient, MatrixConfig};

use herald_api::routes::create_router;
use herald_api::state::AppState;

/// Alertmanager batches are small; anything larger is not a webhook.
const MAX_BODY_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Herald API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Open the project store
    let store = Arc::new(ProjectStore::open(&config.store_path)?);

    // Delivery queue + Matrix transport
    let queue = DeliveryQueue::new();
    let matrix = MatrixClient::new(MatrixConfig {
        homeserver_url: config.matrix_homeserver_url.clone(),
        access_token: config.matrix_access_token.clone(),
        timeout: Duration::from_secs(config.delivery_timeout_secs),
    })?;

    // Start the delivery worker
    let cancel = CancellationToken::new();
    let policy = BackoffPolicy::from_secs(
        config.backoff_initial_secs,
        config.backoff_step_secs,
        config.backoff_max_secs,
    );
    let worker = DeliveryWorker::new(queue.clone(), matrix, policy, cancel.clone());
    let worker_stats = worker.stats();
    let worker_handle = worker.spawn();

    // Build application state
    let bind_addr = config.bind_addr;
    let state = AppState::new(store, queue.clone(), worker_stats, config);

    // Build router
    let app = create_router(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop the worker; anything still queued is lost with the process.
    cancel.cancel();
    if let Err(e) = worker_handle.await {
        tracing::error!(error = %e, "Delivery worker panicked");
    }

    tracing::info!(undelivered = queue.len(), "Herald API server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("herald_api=info,herald_notifier=debug,herald_engine=debug,tower_http=info")
    });

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
