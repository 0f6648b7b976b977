// =============================================================================
// REST endpoints — Axum 0.7
// =============================================================================
//
// The read endpoint serves the cache and only the cache: it never reaches
// upstream on the caller's behalf. Force-refresh requires a shared-secret
// header compared in constant time. CORS is permissive — the viewers are
// cross-origin embeds.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::quote::QuotePayload;
use crate::worker;

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/quote", get(quote))
        .route("/quote/stream", get(crate::api::stream::stream_handler))
        .route("/quote/force-refresh", post(force_refresh))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// GET /quote
// =============================================================================

async fn quote(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let identity = addr.ip().to_string();

    let decision = state.rate_limiter.allow(&identity);
    if !decision.allowed {
        let body = serde_json::json!({
            "error": "rate limit exceeded",
            "retry_after_secs": decision.retry_after_secs,
        });
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, decision.retry_after_secs.to_string())],
            Json(body),
        )
            .into_response();
    }

    match state.cache.read() {
        Some(entry) => {
            Json(QuotePayload::from_entry(&state.settings.pair, &entry)).into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "error": "exchange rate not yet available",
                "detail": "no upstream quote has been received since startup",
            })),
        )
            .into_response(),
    }
}

// =============================================================================
// POST /quote/force-refresh
// =============================================================================

const REFRESH_SECRET_HEADER: &str = "x-refresh-secret";

async fn force_refresh(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let expected = &state.settings.refresh_secret;

    if expected.is_empty() {
        warn!("FXRELAY_REFRESH_SECRET is not set — force-refresh requests are rejected");
        return forbidden();
    }

    let presented = headers
        .get(REFRESH_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        warn!("invalid force-refresh secret presented");
        return forbidden();
    }

    match worker::force_update(&state).await {
        Ok(fresh) => {
            info!(source = %fresh.source, "manual refresh applied");
            Json(serde_json::json!({
                "success": true,
                "message": format!("rate refreshed from {}", fresh.source),
                "timestamp": Utc::now().to_rfc3339(),
            }))
            .into_response()
        }
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(serde_json::json!({
                "success": false,
                "message": e.to_string(),
                "timestamp": Utc::now().to_rfc3339(),
            })),
        )
            .into_response(),
    }
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(serde_json::json!({
            "success": false,
            "message": "invalid or missing refresh secret",
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Compare two byte slices in constant time. The comparison examines every
/// byte even after a mismatch so response timing does not leak the prefix.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

// =============================================================================
// GET /health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(state.health_snapshot()).into_response()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quote::Quote;
    use crate::settings::test_settings;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(test_settings()))
    }

    fn caller() -> ConnectInfo<SocketAddr> {
        ConnectInfo(([127, 0, 0, 1], 40000).into())
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn empty_cache_returns_503() {
        let state = test_state();

        let resp = quote(State(state), caller()).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = body_json(resp).await;
        assert_eq!(body["error"], "exchange rate not yet available");
    }

    #[tokio::test]
    async fn populated_cache_returns_quote_with_spread() {
        let state = test_state();
        state
            .cache
            .update(Quote::new(5.10, 5.12, "test", false).unwrap());

        let resp = quote(State(state), caller()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["symbol"], "USD-BRL");
        assert!((body["bid"].as_f64().unwrap() - 5.10).abs() < f64::EPSILON);
        assert!((body["ask"].as_f64().unwrap() - 5.12).abs() < f64::EPSILON);
        assert!((body["spread"].as_f64().unwrap() - 0.02).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn rate_limit_kicks_in_with_retry_hint() {
        let mut settings = test_settings();
        settings.rate_limit_max = 2;
        let state = Arc::new(AppState::new(settings));
        state
            .cache
            .update(Quote::new(5.10, 5.12, "test", false).unwrap());

        for _ in 0..2 {
            let resp = quote(State(state.clone()), caller()).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = quote(State(state), caller()).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(resp.headers().contains_key(header::RETRY_AFTER));

        let body = body_json(resp).await;
        assert!(body["retry_after_secs"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn force_refresh_with_wrong_secret_is_rejected_without_side_effects() {
        let state = test_state();

        let mut headers = HeaderMap::new();
        headers.insert(REFRESH_SECRET_HEADER, "wrong".parse().unwrap());

        let resp = force_refresh(State(state.clone()), headers).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // No side effects: the cache is still empty.
        assert!(state.cache.read().is_none());
    }

    #[tokio::test]
    async fn force_refresh_without_header_is_rejected() {
        let state = test_state();
        let resp = force_refresh(State(state), HeaderMap::new()).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn force_refresh_rejected_when_secret_unconfigured() {
        let mut settings = test_settings();
        settings.refresh_secret = String::new();
        let state = Arc::new(AppState::new(settings));

        let mut headers = HeaderMap::new();
        headers.insert(REFRESH_SECRET_HEADER, "anything".parse().unwrap());

        let resp = force_refresh(State(state), headers).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_reports_cache_and_stream() {
        let state = test_state();
        state
            .cache
            .update(Quote::new(5.10, 5.12, "test", false).unwrap());

        let resp = health(State(state)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["cache"]["has_data"], true);
        assert_eq!(body["stream"]["connected_clients"], 0);
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"short", b"longer"));
        assert!(constant_time_eq(b"", b""));
    }
}
