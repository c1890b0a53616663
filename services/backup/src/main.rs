use anyhow::{Context, Result};
use backup_service::api::{start_api_server, AppState};
use backup_service::config::{Config, ServiceConfig};
use backup_service::{
    spawn_supervised_listener, BackupHandler, ConnectionState, IntakeListener,
    ObjectPlacementWriter, ObjectStore, S3ObjectStore,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service)?;

    info!(
        service = %config.service.name,
        "Starting Biofield Backup Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Object store, bucket checked once before any message is consumed
    let store = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize S3 object store")?,
    );

    if config.s3.create_bucket {
        let status = store
            .ensure_bucket()
            .await
            .context("Failed to ensure backup bucket exists")?;
        info!(bucket = %store.bucket(), status = ?status, "Backup bucket ready");
    }

    let writer = ObjectPlacementWriter::new(store.clone(), config.placement.collision_policy);
    let handler = Arc::new(BackupHandler::new(writer));

    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let listener = IntakeListener::new(&config.mqtt, handler, state_tx)
        .context("Failed to initialize MQTT listener")?;

    let token = CancellationToken::new();

    // Spawn supervised listener task
    let mut listener_handle =
        spawn_supervised_listener(listener, config.supervisor.clone(), token.clone());

    // Spawn API server task
    let api_state = AppState {
        connection: state_rx,
    };
    let api_config = config.api.clone();
    let api_token = token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_token).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Backup service started successfully");

    let listener_exited = tokio::select! {
        _ = shutdown_signal() => false,
        result = &mut listener_handle => {
            if let Err(e) = result {
                error!(error = %e, "Intake listener task panicked");
            }
            true
        }
    };

    info!("Shutting down backup service");
    token.cancel();

    if !listener_exited {
        if let Err(e) = listener_handle.await {
            error!(error = %e, "Intake listener task panicked");
        }
    }

    if let Err(e) = api_handle.await {
        warn!(error = %e, "API server task panicked");
    }

    if listener_exited {
        anyhow::bail!("Intake listener stopped before shutdown was requested");
    }

    info!("Backup service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &ServiceConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
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
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
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
