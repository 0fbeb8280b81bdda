use anyhow::{Context, Result};
use records_service::{
    db, notifier, start_api_server, AppState, Config, MediaIngestor, PgRequestStore, PgUserStore,
    RequestService, StorageLayout, StorageProvisioner, TelegramRelay, UserLifecycleService,
    UuidKeyGenerator,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Records Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let pool = db::connect(&config.database)
        .await
        .context("Failed to initialize database pool")?;

    if config.database.run_migrations {
        db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
    }

    let layout = StorageLayout::new(config.users_root());
    let provisioner = StorageProvisioner::new(layout.clone());
    provisioner
        .ensure_root()
        .await
        .context("Failed to prepare user storage root")?;

    info!(users_root = %layout.users_root().display(), "User storage ready");

    let users = UserLifecycleService::new(
        Arc::new(UuidKeyGenerator),
        provisioner,
        MediaIngestor::new(layout),
        Arc::new(PgUserStore::new(pool.clone())),
        config.storage.key_attempts,
    );

    let notifier = notifier::from_config(&config.notifications, config.notification_timeout())
        .context("Failed to initialize notifier")?;
    let relay = TelegramRelay::new(
        &config.notifications,
        config.relay_poll_timeout(),
        notifier.clone(),
    )
    .context("Failed to initialize request relay")?;
    let requests = RequestService::new(Arc::new(PgRequestStore::new(pool.clone())), notifier);

    let api_state = AppState {
        users: Arc::new(users),
        requests: Arc::new(requests),
        pool,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let static_root = api_config
        .serve_static
        .then(|| config.storage.static_root.clone());
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, static_root).await {
            error!(error = %e, "API server error");
        }
    });

    // Spawn relay task when a source chat is configured
    let relay_handle = relay.map(|relay| tokio::spawn(relay.run()));

    info!("Records service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down records service");

    api_handle.abort();
    if let Some(handle) = relay_handle {
        handle.abort();
    }

    info!("Records service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
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
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
