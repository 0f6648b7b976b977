// =============================================================================
// Mode B — scheduled pulls through the aggregator
// =============================================================================
//
// Triggers are either a short fixed interval or fixed daily wall-clock times
// evaluated in a configured UTC offset. Every trigger goes through the
// shared run-lock, so a trigger that fires while a run is still in flight is
// a no-op. A failed trigger leaves the cache untouched and broadcasts
// nothing — viewers keep reading the last-known-good rate.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tokio::time::interval;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::settings::Schedule;
use crate::worker::run_refresh;

pub async fn run(state: Arc<AppState>) {
    match state.settings.schedule.clone() {
        Schedule::Interval(secs) => {
            info!(interval_secs = secs, "scheduled pull worker started");
            let mut ticker = interval(Duration::from_secs(secs.max(1)));
            loop {
                // The first tick fires immediately, which doubles as the
                // startup fetch.
                ticker.tick().await;
                trigger(&state).await;
            }
        }
        Schedule::Daily(triggers) => {
            info!(
                triggers = ?triggers,
                offset = %state.settings.schedule_utc_offset,
                "daily pull worker started"
            );

            // Daily triggers can be hours away; fill the cache now so
            // viewers are not empty until the first trigger.
            if !state.cache.status().has_data {
                trigger(&state).await;
            }

            loop {
                let delay = next_trigger_delay(
                    Utc::now(),
                    state.settings.schedule_utc_offset,
                    &triggers,
                );
                info!(in_secs = delay.as_secs(), "next scheduled refresh");
                tokio::time::sleep(delay).await;
                trigger(&state).await;
            }
        }
    }
}

async fn trigger(state: &Arc<AppState>) {
    match run_refresh(state).await {
        Ok(quote) => {
            info!(source = %quote.source, bid = quote.bid, ask = quote.ask, "scheduled refresh applied");
        }
        Err(e) => {
            warn!(error = %e, "scheduled refresh failed — retaining last-known-good rate");
        }
    }
}

/// Time until the next daily trigger, evaluated on the configured offset's
/// wall clock. `triggers` is sorted (hour, minute) pairs.
fn next_trigger_delay(
    now_utc: DateTime<Utc>,
    offset: FixedOffset,
    triggers: &[(u32, u32)],
) -> Duration {
    let local_now = now_utc.with_timezone(&offset);
    let today = local_now.date_naive();

    // First trigger later today wins; triggers are sorted.
    for &(hour, minute) in triggers {
        let Some(naive) = today.and_hms_opt(hour, minute, 0) else {
            continue;
        };
        if let Some(candidate) = offset.from_local_datetime(&naive).single() {
            if candidate > local_now {
                return (candidate - local_now).to_std().unwrap_or(Duration::ZERO);
            }
        }
    }

    // All of today's triggers have passed: first trigger tomorrow.
    let Some((hour, minute)) = triggers.first().copied() else {
        return Duration::from_secs(60);
    };
    let next = today
        .succ_opt()
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .and_then(|naive| offset.from_local_datetime(&naive).single());

    match next {
        Some(candidate) => (candidate - local_now).to_std().unwrap_or(Duration::ZERO),
        None => Duration::from_secs(60),
    }
}

// =============================================================================
// Tests
// =============================================================================
