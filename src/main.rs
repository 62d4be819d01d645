use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

mod app;
mod error;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "cortex=info,tower_http=debug".into()))
        .init();

    let config_path = std::env::var("CORTEX_CONFIG").ok();
    let config = cortex_core::config::CortexConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        cortex_core::config::CortexConfig::default()
    });

    let state = Arc::new(app::CoreContext::new(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fired_tx, fired_rx) = mpsc::channel(64);

    let scheduler = app::scheduler_engine(&state, fired_tx);
    let scheduler_shutdown = shutdown_rx.clone();
    let scheduler_task = tokio::spawn(scheduler.run(scheduler_shutdown));

    let gardener = app::CoreContext::gardener_engine(&state);
    let gardener_shutdown = shutdown_rx.clone();
    let gardener_task = tokio::spawn(gardener.run(gardener_shutdown));

    let drain_task = tokio::spawn(app::run_notification_drain(state.clone(), fired_rx));

    let router = app::build_router(state.clone());

    let bind = std::env::var("CORTEX_BIND").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("CORTEX_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(8420);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;

    info!("cortex listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = scheduler_task.await;
    let _ = gardener_task.await;
    drain_task.abort();

    Ok(())
}
