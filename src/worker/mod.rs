// =============================================================================
// Update worker — drives cache refresh and broadcast
// =============================================================================
//
// The worker runs in exactly one of two modes, chosen at startup:
//
//   Mode A (ingest.rs)   — persistent WebSocket ingestion with bounded
//                          reconnect/backoff.
//   Mode B (schedule.rs) — scheduled pulls through the aggregator.
//
// Both modes and the force-refresh endpoint funnel through `run_refresh`,
// which holds the run-lock so cache-mutating pulls never overlap.

pub mod ingest;
pub mod schedule;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::app_state::AppState;
use crate::quote::{Quote, QuotePayload};
use crate::settings::WorkerMode;

// =============================================================================
// Ingestion phase machine
// =============================================================================

/// Connection state of the Mode A ingestion link.
///
/// Transitions: Disconnected → Connecting → Live → Reconnecting →
/// Connecting → …; Failed once the retry ceiling is exceeded; Closed only on
/// deliberate shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Disconnected,
    Connecting,
    Live,
    Reconnecting,
    Failed,
    Closed,
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Live => write!(f, "live"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Shared worker status
// =============================================================================

/// Worker state shared with the health endpoint.
pub struct WorkerStatus {
    mode: WorkerMode,
    phase: RwLock<IngestPhase>,
    reconnect_attempt: AtomicU32,
    last_error: RwLock<Option<String>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    /// Serializes cache-mutating pulls: scheduled triggers and force-refresh
    /// share it; an overlapping trigger is a no-op.
    pub run_lock: tokio::sync::Mutex<()>,
}

/// Serializable view of the worker for `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub mode: String,
    /// Ingestion link phase; absent in pull mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_refresh: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn new(mode: WorkerMode) -> Self {
        Self {
            mode,
            phase: RwLock::new(IngestPhase::Disconnected),
            reconnect_attempt: AtomicU32::new(0),
            last_error: RwLock::new(None),
            last_refresh: RwLock::new(None),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn phase(&self) -> IngestPhase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: IngestPhase) {
        *self.phase.write() = phase;
    }

    /// Increment the consecutive reconnect counter and return its new value.
    pub fn bump_attempt(&self) -> u32 {
        self.reconnect_attempt.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Reset the reconnect counter once the link is healthy again.
    pub fn reset_attempts(&self) {
        self.reconnect_attempt.store(0, Ordering::Relaxed);
    }

    pub fn record_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    pub fn record_refresh(&self) {
        *self.last_refresh.write() = Some(Utc::now());
        *self.last_error.write() = None;
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            mode: self.mode.to_string(),
            ingestion: match self.mode {
                WorkerMode::Ingest => Some(self.phase().to_string()),
                WorkerMode::Pull => None,
            },
            last_error: self.last_error.read().clone(),
            last_refresh: *self.last_refresh.read(),
        }
    }
}

// =============================================================================
// Refresh path
// =============================================================================

/// Write `quote` into the cache and fan the new entry out to every stream
/// subscriber. The single choke point every refresh source goes through.
pub fn apply_quote(state: &AppState, quote: Quote) {
    let entry = state.cache.update(quote);
    state
        .hub
        .broadcast(&QuotePayload::from_entry(&state.settings.pair, &entry));
    state.worker.record_refresh();
}

/// One aggregator fetch → cache update → broadcast, behind the run-lock.
///
/// Returns the fresh quote, or an error when another run is already in
/// flight or every source failed. On failure the cache keeps its last good
/// value and no broadcast is emitted.
pub async fn run_refresh(state: &AppState) -> Result<Quote> {
    let _guard = state
        .worker
        .run_lock
        .try_lock()
        .map_err(|_| anyhow::anyhow!("refresh already in flight"))?;

    match state.aggregator.fetch_quote().await {
        Ok(quote) => {
            apply_quote(state, quote.clone());
            Ok(quote)
        }
        Err(e) => {
            state.worker.record_error(e.to_string());
            Err(e.into())
        }
    }
}

/// Manual refresh outside the normal cadence, used by the force-refresh
/// endpoint. Same lock, same update/broadcast path.
pub async fn force_update(state: &AppState) -> Result<Quote> {
    info!("manual refresh requested");
    run_refresh(state).await
}

/// Launch the configured worker mode on the runtime.
pub fn spawn(state: Arc<AppState>) {
    match state.settings.mode {
        WorkerMode::Ingest => {
            tokio::spawn(ingest::run(state));
        }
        WorkerMode::Pull => {
            tokio::spawn(schedule::run(state));
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
