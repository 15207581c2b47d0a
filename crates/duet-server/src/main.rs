//! Duet signaling server binary.
//!
//! Wires the hub, stores, and limiters together, owns the background
//! sweepers, and serves until interrupted.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use duet_hub::SSE_REAPER_INTERVAL;
use duet_server::config::ServerConfig;
use duet_server::{build_router, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TOKEN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ServerConfig::from_env()?;
    if config.room_id_secret.is_none() {
        warn!("ROOM_ID_SECRET is not set; room minting and joins will fail until it is configured");
    }
    if !config.turn_configured() {
        warn!("TURN_HOST/TURN_SECRET not set; relay credentials are disabled");
    }

    let state = AppState::from_config(&config);
    spawn_sweepers(&state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "signaling server listening");

    let router = build_router(state);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

fn spawn_sweepers(state: &AppState) {
    let tokens = state.tokens.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(TOKEN_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            let removed = tokens.sweep();
            if removed > 0 {
                info!(removed, "swept expired relay tokens");
            }
        }
    });

    let hub = state.hub.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SSE_REAPER_INTERVAL);
        loop {
            tick.tick().await;
            hub.evict_stale_sessions();
        }
    });

    let limits = state.limits.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            limits.sweep_all();
        }
    });
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
