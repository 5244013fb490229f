/// Read-through cache and heatmap service for an uptime-monitoring API
mod clients;
mod config;
mod domain;
mod errors;
mod handlers;
mod repo;
mod routes;
mod services;
mod utils;

use crate::clients::{ProxyClient, UptimeClient};
use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::repo::{init_db, MemoryStore, PgStore, Store};
use crate::routes::build_router;
use crate::services::{PassthroughService, RefreshOutcome, RefreshService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(url)
                .await?;
            info!("Database connection pool established");
            init_db(&pool).await?;
            info!("Database schema initialized");
            Arc::new(PgStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, state will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize clients
    let uptime_client = Arc::new(UptimeClient::new(
        config.api_url.clone(),
        config.api_token.clone(),
    )?);
    let proxy_client = ProxyClient::new(config.proxy_timeout)?;

    // Initialize services
    let refresh_service = Arc::new(RefreshService::new(
        uptime_client.clone(),
        store,
        config.refresh.clone(),
    ));
    let passthrough_service = Arc::new(PassthroughService::new(
        uptime_client,
        proxy_client,
        config.refresh.monitor_page_size,
        config.refresh.incident_page_cap,
    ));

    if let Err(e) = refresh_service.hydrate().await {
        error!("Cache hydration failed, starting cold: {:?}", e);
    }

    // Start background refresh loop
    start_refresh_task(refresh_service.clone());

    let state = AppState {
        refresh: refresh_service,
        passthrough: passthrough_service,
    };

    // Build router
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("uptime_cache listening on {}", config.listen_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Refresh once at startup, then on every interval
fn start_refresh_task(service: Arc<RefreshService>) {
    let interval = service.settings().interval;
    tokio::spawn(async move {
        info!("Starting refresh task (interval: {}s)", interval.as_secs());
        loop {
            match service.refresh().await {
                RefreshOutcome::Completed { monitors } => {
                    info!("Scheduled refresh stored {} monitors", monitors)
                }
                RefreshOutcome::Skipped => info!("Scheduled refresh skipped, another is running"),
                RefreshOutcome::Failed | RefreshOutcome::TimedOut => {
                    warn!("Scheduled refresh did not complete, retrying next interval")
                }
            }
            tokio::time::sleep(interval).await;
        }
    });
}
