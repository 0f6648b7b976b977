// =============================================================================
// Central application state
// =============================================================================
//
// The single source of truth wired into every async task via
// `Arc<AppState>`. The cache is exclusively mutated by the update worker;
// endpoints and the hub read it. The hub exclusively owns the subscriber
// set. There is no cross-process coordination: one process owns this state,
// and multiple instances hold independent, non-coherent caches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::{CacheStatus, QuoteCache};
use crate::hub::BroadcastHub;
use crate::providers::Aggregator;
use crate::rate_limit::RateLimiter;
use crate::settings::Settings;
use crate::worker::{IngestPhase, WorkerSnapshot, WorkerStatus};

pub struct AppState {
    pub settings: Settings,
    pub cache: QuoteCache,
    pub hub: Arc<BroadcastHub>,
    pub rate_limiter: RateLimiter,
    pub aggregator: Aggregator,
    pub worker: WorkerStatus,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let aggregator = Aggregator::from_settings(&settings);
        Self::with_aggregator(settings, aggregator)
    }

    /// Construct with an explicit aggregator (used by tests to inject
    /// stub providers).
    pub fn with_aggregator(settings: Settings, aggregator: Aggregator) -> Self {
        Self {
            cache: QuoteCache::new(),
            hub: Arc::new(BroadcastHub::new()),
            rate_limiter: RateLimiter::new(
                settings.rate_limit_max,
                Duration::from_secs(settings.rate_limit_window_secs),
            ),
            aggregator,
            worker: WorkerStatus::new(settings.mode),
            start_time: Instant::now(),
            settings,
        }
    }

    /// Build the `GET /health` body.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let worker = self.worker.snapshot();
        let status = if self.worker.phase() == IngestPhase::Failed {
            "degraded"
        } else {
            "ok"
        };

        HealthSnapshot {
            status,
            uptime_secs: self.start_time.elapsed().as_secs(),
            cache: self.cache.status(),
            stream: StreamStatus {
                connected_clients: self.hub.count(),
            },
            worker,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub connected_clients: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub cache: CacheStatus,
    pub stream: StreamStatus,
    pub worker: WorkerSnapshot,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Quote;
    use crate::settings::test_settings;

    #[test]
    fn health_reflects_cache_and_stream_state() {
        let state = AppState::new(test_settings());

        let health = state.health_snapshot();
        assert_eq!(health.status, "ok");
        assert!(!health.cache.has_data);
        assert_eq!(health.stream.connected_clients, 0);

        state
            .cache
            .update(Quote::new(5.10, 5.12, "test", false).unwrap());
        let health = state.health_snapshot();
        assert!(health.cache.has_data);
        assert!(health.cache.last_update.is_some());
    }

    #[test]
    fn health_degrades_on_terminal_ingestion_failure_but_keeps_cache() {
        let state = AppState::new(test_settings());
        state
            .cache
            .update(Quote::new(5.10, 5.12, "test", false).unwrap());

        state.worker.set_phase(IngestPhase::Failed);

        let health = state.health_snapshot();
        assert_eq!(health.status, "degraded");
        // The stale cache is still served.
        assert!(health.cache.has_data);
    }
}
