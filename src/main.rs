// =============================================================================
// FX Relay — Main Entry Point
// =============================================================================
//
// One process, one cache: the update worker keeps the rate fresh out-of-band
// while the HTTP layer serves reads and push streams from the cache alone.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod cache;
mod errors;
mod hub;
mod providers;
mod quote;
mod rate_limit;
mod settings;
mod worker;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::settings::{Settings, WorkerMode};
use crate::worker::IngestPhase;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║             FX Relay — Starting Up                       ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let settings = Settings::from_env()?;
    settings.log_summary();

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(settings));

    // ── 3. Stream heartbeat loop ─────────────────────────────────────────
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(
            heartbeat_state.settings.heartbeat_secs.max(1),
        ));
        ticker.tick().await; // first tick fires immediately
        loop {
            ticker.tick().await;
            heartbeat_state.hub.heartbeat();
        }
    });

    // ── 4. Update worker ─────────────────────────────────────────────────
    worker::spawn(state.clone());
    info!(mode = %state.settings.mode, "update worker launched");

    // ── 5. HTTP server ───────────────────────────────────────────────────
    let bind_addr = state.settings.bind_addr.clone();
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    if state.settings.mode == WorkerMode::Ingest {
        state.worker.set_phase(IngestPhase::Closed);
    }

    info!("FX Relay shut down complete.");
    Ok(())
}
