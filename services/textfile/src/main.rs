use anyhow::{Context, Result};
use std::sync::Arc;
use textfile_service::api::{start_api_server, AppState};
use textfile_service::{
    Config, HttpAuthorizer, PgLineStore, RequestHandler, RetryPolicy, StorageGateway,
};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting text file service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Open the pool once; it is closed again on shutdown
    let line_store = Arc::new(
        PgLineStore::new(&config.database)
            .await
            .context("Failed to initialize line store")?,
    );

    let gateway = Arc::new(StorageGateway::new(
        line_store.clone(),
        RetryPolicy::from(&config.retry),
    ));

    let authorizer =
        Arc::new(HttpAuthorizer::new(&config.auth).context("Failed to initialize authorizer")?);
    info!(url = %authorizer.validate_url(), "Using validate-user service");

    let api_state = AppState {
        handler: Arc::new(RequestHandler::new(authorizer, gateway)),
        service_name: config.service.name.clone(),
    };

    start_api_server(api_state, &config.api, shutdown_signal()).await?;

    info!("Shutting down text file service");

    line_store.close().await;

    info!("Text file service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
