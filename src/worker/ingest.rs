// =============================================================================
// Mode A — persistent WebSocket ingestion
// =============================================================================
//
// Maintains a long-lived link to a push-capable rate feed. Every inbound
// frame is parsed, validated, written to the cache, and broadcast. The link
// is driven by an explicit phase machine (see `IngestPhase`): any unexpected
// closure enters `Reconnecting` with capped-exponential backoff, and after
// the retry ceiling the worker reports `Failed` and stops — the process
// keeps serving the stale cache rather than crashing or retrying forever.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::errors::IngestError;
use crate::providers::parse_price;
use crate::quote::Quote;
use crate::worker::{apply_quote, run_refresh, IngestPhase};

/// Source tag stamped on quotes received over the feed.
const FEED_SOURCE: &str = "feed";

/// Run the ingestion worker until deliberate shutdown or terminal failure.
pub async fn run(state: Arc<AppState>) {
    // One direct aggregator fetch on first startup so a quote is available
    // immediately instead of waiting for the first ingested message.
    if !state.cache.status().has_data {
        match run_refresh(&state).await {
            Ok(quote) => {
                info!(source = %quote.source, bid = quote.bid, ask = quote.ask, "startup fallback fetch populated the cache")
            }
            Err(e) => warn!(error = %e, "startup fallback fetch failed — waiting for the feed"),
        }
    }

    let max_attempts = state.settings.max_reconnect_attempts;

    loop {
        let result = connect_and_stream(&state).await;

        let reason = match result {
            Ok(()) => {
                state.worker.set_phase(IngestPhase::Closed);
                info!("rate feed closed deliberately");
                return;
            }
            Err(e) => e,
        };

        state.worker.record_error(reason.to_string());
        let attempt = state.worker.bump_attempt();

        if attempt > max_attempts {
            state.worker.set_phase(IngestPhase::Failed);
            error!(
                attempts = max_attempts,
                error = %reason,
                "rate feed reconnect attempts exhausted — serving last cached rate"
            );
            return;
        }

        state.worker.set_phase(IngestPhase::Reconnecting);
        let delay = backoff_delay(
            attempt,
            state.settings.backoff_base_secs,
            state.settings.backoff_cap_secs,
        );
        warn!(
            attempt,
            max = max_attempts,
            delay_secs = delay.as_secs(),
            error = %reason,
            "rate feed disconnected — backing off before reconnect"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Open the feed link and pump messages until it drops.
///
/// Returns `Err` on any unexpected closure so the caller can schedule a
/// reconnect; `Ok` is reserved for deliberate shutdown.
async fn connect_and_stream(state: &Arc<AppState>) -> Result<(), IngestError> {
    let settings = &state.settings;

    state.worker.set_phase(IngestPhase::Connecting);
    info!(url = %settings.feed_url, "connecting to rate feed");

    let (ws_stream, _response) = connect_async(settings.feed_url.as_str())
        .await
        .map_err(|e| IngestError::Connect(e.to_string()))?;

    let (mut write, mut read) = ws_stream.split();

    // The feed expects a login frame carrying the credential and the symbol
    // subscription before it starts pushing quotes.
    let login = serde_json::json!({
        "userKey": settings.feed_api_key,
        "symbol": settings.feed_symbol,
    })
    .to_string();
    write
        .send(Message::Text(login))
        .await
        .map_err(|e| IngestError::Transport(e.to_string()))?;

    state.worker.set_phase(IngestPhase::Live);
    info!(symbol = %settings.feed_symbol, "rate feed connected");

    let mut keepalive = interval(Duration::from_secs(settings.keepalive_secs));
    keepalive.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                write
                    .send(Message::Ping(Vec::new()))
                    .await
                    .map_err(|e| IngestError::Transport(e.to_string()))?;
                debug!("keep-alive ping sent");
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match parse_feed_frame(&text) {
                        Ok(Some(quote)) => {
                            state.worker.reset_attempts();
                            apply_quote(state, quote);
                        }
                        // Control frame ("Connected", subscription acks).
                        Ok(None) => debug!(frame = %text, "feed control frame"),
                        // One malformed frame never tears down the link.
                        Err(e) => warn!(error = %e, "dropping malformed feed frame"),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    write
                        .send(Message::Pong(payload))
                        .await
                        .map_err(|e| IngestError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) => {
                    warn!("rate feed sent close frame");
                    return Err(IngestError::Disconnected);
                }
                Some(Ok(_)) => {} // Pong / Binary / Frame — ignored
                Some(Err(e)) => {
                    return Err(IngestError::Transport(e.to_string()));
                }
                None => {
                    return Err(IngestError::Disconnected);
                }
            }
        }
    }
}

/// Parse one inbound feed frame into a validated quote.
///
/// Returns `Ok(None)` for non-JSON control messages. Expected quote shape:
/// ```json
/// { "symbol": "USDBRL", "ts": "1700000000000", "bid": 5.0421, "ask": 5.0436 }
/// ```
fn parse_feed_frame(text: &str) -> Result<Option<Quote>> {
    if !text.trim_start().starts_with('{') {
        return Ok(None);
    }

    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse feed JSON")?;

    let bid = parse_price(&root["bid"], "bid")?;
    let ask = parse_price(&root["ask"], "ask")?;

    let quote = Quote::new(bid, ask, FEED_SOURCE, false)?;
    Ok(Some(quote))
}

/// Capped-exponential backoff: `base * 2^(attempt-1)`, clamped to `cap`.
pub(crate) fn backoff_delay(attempt: u32, base_secs: u64, cap_secs: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let secs = base_secs.saturating_mul(1u64 << exp).min(cap_secs);
    Duration::from_secs(secs)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| backoff_delay(attempt, 2, 60).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 32, 60]);
    }

    #[test]
    fn backoff_never_exceeds_cap_on_large_attempts() {
        assert_eq!(backoff_delay(1000, 2, 60).as_secs(), 60);
    }

    #[test]
    fn parses_quote_frame() {
        let text = r#"{"symbol":"USDBRL","ts":"1700000000000","bid":5.0421,"ask":5.0436,"mid":5.0428}"#;
        let quote = parse_feed_frame(text).unwrap().expect("quote frame");
        assert!((quote.bid - 5.0421).abs() < 1e-12);
        assert!((quote.ask - 5.0436).abs() < 1e-12);
        assert_eq!(quote.source, "feed");
    }

    #[test]
    fn parses_string_encoded_prices() {
        let text = r#"{"symbol":"USDBRL","bid":"5.04","ask":"5.05"}"#;
        let quote = parse_feed_frame(text).unwrap().expect("quote frame");
        assert!((quote.bid - 5.04).abs() < 1e-12);
    }

    #[test]
    fn control_frames_are_skipped_not_errors() {
        assert!(parse_feed_frame("Connected").unwrap().is_none());
        assert!(parse_feed_frame("User is logged in").unwrap().is_none());
    }

    #[test]
    fn malformed_quote_frames_are_errors() {
        // Missing ask.
        assert!(parse_feed_frame(r#"{"symbol":"USDBRL","bid":5.04}"#).is_err());
        // Invalid price.
        assert!(parse_feed_frame(r#"{"bid":0.0,"ask":5.05}"#).is_err());
        // Inverted spread.
        assert!(parse_feed_frame(r#"{"bid":5.10,"ask":5.05}"#).is_err());
        // Broken JSON.
        assert!(parse_feed_frame(r#"{"bid":"#).is_err());
    }

    #[test]
    fn phase_display_names() {
        assert_eq!(IngestPhase::Live.to_string(), "live");
        assert_eq!(IngestPhase::Reconnecting.to_string(), "reconnecting");
        assert_eq!(IngestPhase::Failed.to_string(), "failed");
    }
}
