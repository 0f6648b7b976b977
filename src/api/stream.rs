// =============================================================================
// GET /quote/stream — Server-Sent Events push stream
// =============================================================================
//
// On open the client immediately receives the current cache value (or a
// waiting marker when the cache is empty), then every broadcast and
// heartbeat the hub emits. The client's IP is its identity: opening a second
// stream closes the first. The hub slot is a scoped resource — the guard
// rides inside the response stream, so dropping the connection releases the
// slot even when the hub never observed a failed write.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{ConnectInfo, State},
    response::sse::{Event, Sse},
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::app_state::AppState;
use crate::hub::{Frame, SubscriberGuard};
use crate::quote::QuotePayload;

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let identity = addr.ip().to_string();
    debug!(identity = %identity, "stream subscription requested");

    // No-wait initial sync: current quote if present, inert marker if not.
    let initial = match state.cache.read() {
        Some(entry) => {
            Frame::quote(&QuotePayload::from_entry(&state.settings.pair, &entry))
                .unwrap_or_else(Frame::waiting)
        }
        None => Frame::waiting(),
    };

    let (rx, guard) = state.hub.subscribe(&identity, initial);

    let stream = GuardedStream {
        inner: ReceiverStream::new(rx),
        _guard: guard,
    }
    .map(|frame| Ok::<_, Infallible>(Event::default().event(frame.event).data(frame.data)));

    Sse::new(stream)
}

/// Frame stream that owns the hub subscription guard, tying the slot's
/// lifetime to the response body.
struct GuardedStream {
    inner: ReceiverStream<Frame>,
    _guard: SubscriberGuard,
}

impl Stream for GuardedStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
