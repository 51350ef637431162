mod claims;
mod clock;
mod config;
mod cooldown;
mod entities;
mod http;
mod identity;
mod models;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::claims::ClaimOrchestrator;
use crate::clock::{Clock, SystemClock};
use crate::config::{ApiConfig, DatabaseConfig, StorageBackend};
use crate::models::coupon::normalize_coupon_code;
use crate::state::{ApiCache, AppState};
use crate::store::{Storage, bounded};
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;

    let storage = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; claims are lost on restart");
            Storage::memory()
        }
        StorageBackend::Postgres => {
            let database_config = config
                .database
                .as_ref()
                .context("[database] section is required for the postgres backend")?;
            let database = connect_database(database_config).await?;
            run_migrations(&database).await?;
            Storage::database(database)
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage_timeout = config.storage.timeout();
    seed_coupons(&storage, &config, clock.as_ref(), storage_timeout).await?;

    let cache = Arc::new(ApiCache::new(&config.cache));
    let orchestrator = ClaimOrchestrator::new(
        storage.clone(),
        Arc::clone(&cache),
        Arc::clone(&clock),
        &config.claims,
        storage_timeout,
    );
    let app_state = AppState::new(
        storage,
        Arc::new(orchestrator),
        clock,
        storage_timeout,
        config.server.secure_cookies,
    );

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(shutdown_signal(shutdown_tx.clone()));

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!(
        cooldown = config.claims.cooldown_period_seconds,
        "Coupon dispenser listening on {local_addr}"
    );

    let router: Router = http::router(app_state);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    );
    server
        .with_graceful_shutdown(async move {
            // Sender dropped counts as shutdown too
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    signal_handle.abort();
    info!("Coupon dispenser stopped");
    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    let json = std::env::var("COUPON_API_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn connect_database(config: &DatabaseConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.min_connections {
        options.min_connections(min);
    }

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

/// Insert configured coupon codes that are not stored yet. Invalid entries
/// are skipped with a warning rather than aborting start-up.
async fn seed_coupons(
    storage: &Storage,
    config: &ApiConfig,
    clock: &dyn Clock,
    storage_timeout: Duration,
) -> Result<()> {
    let mut codes = Vec::with_capacity(config.seed.coupons.len());
    for raw in &config.seed.coupons {
        match normalize_coupon_code(raw) {
            Ok(code) => codes.push(code),
            Err(err) => warn!(code = %raw, "Skipping seed coupon: {err}"),
        }
    }

    let inserted = bounded(storage_timeout, storage.coupons.seed(&codes, clock.now()))
        .await
        .context("Failed to seed coupons")?;
    let total = bounded(storage_timeout, storage.coupons.count())
        .await
        .context("Failed to count coupons")?;
    info!(
        inserted,
        total,
        backend = storage.backend_name(),
        "Coupon rotation ready"
    );
    if total == 0 {
        warn!("No coupons configured; every claim will be refused");
    }
    Ok(())
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
