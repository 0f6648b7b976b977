// =============================================================================
// Broadcast hub — fan-out of cache updates to live stream subscribers
// =============================================================================
//
// The hub owns the subscriber set. Admission enforces one live stream per
// client identity: a second subscribe for the same identity closes and
// replaces the first. Delivery is non-blocking (`try_send`); a sink whose
// send fails — closed channel or full buffer — is removed in the same pass,
// so one broken subscriber never delays the rest.
//
// Each subscriber is a scoped resource: `subscribe` returns a guard whose
// Drop releases the hub slot when the connection's stream is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::quote::QuotePayload;

/// Outbound frames are buffered per subscriber; a consumer this far behind
/// is evicted rather than awaited.
const CHANNEL_CAPACITY: usize = 32;

/// One pre-serialized event-stream frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// SSE event name: "quote", "heartbeat", or "waiting".
    pub event: &'static str,
    /// JSON payload, serialized once per broadcast.
    pub data: String,
}

impl Frame {
    pub fn quote(payload: &QuotePayload) -> Option<Self> {
        match serde_json::to_string(payload) {
            Ok(data) => Some(Self { event: "quote", data }),
            Err(e) => {
                warn!(error = %e, "failed to serialize quote payload");
                None
            }
        }
    }

    /// Inert marker pushed to a new subscriber when the cache is empty.
    pub fn waiting() -> Self {
        Self {
            event: "waiting",
            data: serde_json::json!({
                "type": "waiting",
                "message": "exchange rate not yet available",
            })
            .to_string(),
        }
    }

    /// Inert keep-alive payload, distinguishable from real quotes.
    fn heartbeat() -> Self {
        Self {
            event: "heartbeat",
            data: serde_json::json!({
                "type": "heartbeat",
                "server_time": Utc::now().timestamp_millis(),
            })
            .to_string(),
        }
    }
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<Frame>,
    #[allow(dead_code)]
    opened_at: DateTime<Utc>,
}

/// Releases the subscriber's hub slot when dropped. Id-checked so that a
/// stale guard (from an evicted stream) cannot remove its replacement.
pub struct SubscriberGuard {
    hub: Arc<BroadcastHub>,
    identity: String,
    id: Uuid,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.identity, self.id);
    }
}

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<String, Subscriber>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a subscriber for `identity`, evicting any existing stream for
    /// the same identity first. `initial` is pushed to the new sink before
    /// any subsequent broadcast can reach it.
    pub fn subscribe(
        self: &Arc<Self>,
        identity: &str,
        initial: Frame,
    ) -> (mpsc::Receiver<Frame>, SubscriberGuard) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let id = Uuid::new_v4();

        let total = {
            let mut subs = self.subscribers.lock();

            if subs.remove(identity).is_some() {
                // Dropping the old sender closes its channel; the evicted
                // stream ends on its next poll.
                info!(identity = %identity, "evicting previous stream for identity");
            }

            if let Err(e) = tx.try_send(initial) {
                warn!(identity = %identity, error = %e, "failed to push initial frame");
            }

            subs.insert(
                identity.to_string(),
                Subscriber {
                    id,
                    tx,
                    opened_at: Utc::now(),
                },
            );
            subs.len()
        };

        info!(identity = %identity, subscribers = total, "stream subscriber admitted");

        let guard = SubscriberGuard {
            hub: self.clone(),
            identity: identity.to_string(),
            id,
        };
        (rx, guard)
    }

    /// Remove the subscriber for `identity` if it still carries `id`.
    /// Idempotent: removing an already-gone subscriber is a no-op.
    pub fn unsubscribe(&self, identity: &str, id: Uuid) {
        let mut subs = self.subscribers.lock();
        if subs.get(identity).map(|s| s.id) == Some(id) {
            subs.remove(identity);
            debug!(identity = %identity, remaining = subs.len(), "stream subscriber released");
        }
    }

    /// Serialize `payload` once and deliver it to every open sink in one
    /// pass. Sinks whose send fails are unsubscribed in the same pass.
    pub fn broadcast(&self, payload: &QuotePayload) {
        if let Some(frame) = Frame::quote(payload) {
            self.fanout(frame);
        }
    }

    /// Write a heartbeat frame to every open sink. Called on a fixed
    /// interval to keep intermediaries from idle-closing quiet streams.
    pub fn heartbeat(&self) {
        self.fanout(Frame::heartbeat());
    }

    pub fn count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn fanout(&self, frame: Frame) {
        let mut subs = self.subscribers.lock();
        let before = subs.len();

        subs.retain(|identity, sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(identity = %identity, "subscriber buffer full — evicting slow consumer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(identity = %identity, "subscriber channel closed — removing");
                false
            }
        });

        let evicted = before - subs.len();
        if evicted > 0 {
            debug!(evicted, remaining = subs.len(), "fan-out evicted dead subscribers");
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
