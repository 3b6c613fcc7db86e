use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod clock;
mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use crate::{
    clock::{SharedClock, SystemClock},
    config::{AppConfig, RunMode},
    services::{object_store::ObjectStore, rate_limiter::RateLimiter},
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        retention_minutes = cfg.retention_minutes,
        rate_limit = cfg.rate_limit_max_uploads,
        rate_limit_window_secs = cfg.rate_limit_window_secs,
        cron_enabled = cfg.cron_key.is_some(),
        "Starting tmpshare"
    );

    // --- Initialize SQLite ledger ---
    let pool = db::connect(&cfg.database_url).await?;

    if mode == RunMode::Migrate {
        db::run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }
    // Idempotent; keeps a fresh deployment usable without a separate step.
    db::run_migrations(&pool).await?;

    // --- Initialize core services ---
    let clock: SharedClock = Arc::new(SystemClock);
    let store = ObjectStore::new(&cfg.storage_dir, cfg.retention(), clock.clone());
    let limiter = RateLimiter::new(
        Arc::new(pool),
        clock,
        cfg.rate_limit_max_uploads,
        cfg.rate_limit_window(),
    );

    if mode == RunMode::Sweep {
        let state = AppState::new(store, limiter, cfg);
        let report = state.reaper.sweep().await;
        print!("{}", report);
        return Ok(());
    }

    store.ensure_root().await?;
    tracing::info!("Storage directory ready at {}", store.root().display());

    let sweep_every = cfg.sweep_interval_secs;
    let state = AppState::new(store, limiter, cfg);
    if sweep_every > 0 {
        state
            .reaper
            .clone()
            .spawn_periodic(Duration::from_secs(sweep_every));
        tracing::info!("Background sweep every {}s", sweep_every);
    }

    // --- Build router ---
    let app: Router =
        routes::routes::routes(state.config.max_upload_bytes).with_state(state.clone());

    // --- Start server ---
    let addr = state.config.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(state.config.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", state.config.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
