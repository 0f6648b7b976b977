// =============================================================================
// Quote source aggregator — multi-provider fetch with failover
// =============================================================================
//
// Providers are split into two tiers. The primary tier is raced concurrently
// and the first well-formed success wins; losers are cancelled and their
// errors swallowed. If the whole primary tier fails, the backup tier is
// walked sequentially. Only when every provider has failed does the
// aggregator surface `AllSourcesFailed`, carrying each provider's error.
//
// The aggregator is pure with respect to shared state: it touches neither
// the cache nor the hub.

pub mod awesome;
pub mod binance;
pub mod er_api;

pub use awesome::AwesomeApiProvider;
pub use binance::BookTickerProvider;
pub use er_api::ErApiProvider;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, warn};

use crate::errors::{AllSourcesFailed, ProviderError};
use crate::quote::Quote;
use crate::settings::Settings;

/// One upstream rate source, normalized behind a single fetch contract.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Human-readable provider label (also used as the quote's source tag).
    fn name(&self) -> &str;

    /// Fetch and normalize one quote. Implementations validate prices
    /// before returning; the caller applies the timeout.
    async fn fetch(&self) -> Result<Quote, ProviderError>;
}

pub struct Aggregator {
    primary: Vec<Box<dyn RateProvider>>,
    backup: Vec<Box<dyn RateProvider>>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        primary: Vec<Box<dyn RateProvider>>,
        backup: Vec<Box<dyn RateProvider>>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary,
            backup,
            timeout,
        }
    }

    /// Wire up the bundled provider set: book-ticker and AwesomeAPI as the
    /// primary tier, the midpoint-only ER-API as backup.
    pub fn from_settings(settings: &Settings) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.provider_timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        let primary: Vec<Box<dyn RateProvider>> = vec![
            Box::new(BookTickerProvider::new(
                client.clone(),
                settings.binance_base_url.clone(),
                settings.exchange_symbol.clone(),
            )),
            Box::new(AwesomeApiProvider::new(
                client.clone(),
                settings.awesome_base_url.clone(),
                settings.base_ccy.clone(),
                settings.quote_ccy.clone(),
            )),
        ];

        let backup: Vec<Box<dyn RateProvider>> = vec![Box::new(ErApiProvider::new(
            client,
            settings.er_api_base_url.clone(),
            settings.base_ccy.clone(),
            settings.quote_ccy.clone(),
            settings.synthetic_spread_pct,
            settings.min_spread,
        ))];

        Self::new(
            primary,
            backup,
            Duration::from_millis(settings.provider_timeout_ms),
        )
    }

    /// Fetch one normalized quote: race the primary tier, then fall through
    /// the backup tier in order.
    pub async fn fetch_quote(&self) -> Result<Quote, AllSourcesFailed> {
        let mut failures: Vec<(String, ProviderError)> = Vec::new();

        // -- Primary tier: concurrent race, first success wins --------------
        let mut race: FuturesUnordered<_> = self
            .primary
            .iter()
            .map(|p| fetch_with_timeout(p.as_ref(), self.timeout))
            .collect();

        while let Some((name, result)) = race.next().await {
            match result {
                Ok(quote) => {
                    debug!(provider = %name, bid = quote.bid, ask = quote.ask, "primary tier quote accepted");
                    return Ok(quote);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "primary provider failed");
                    failures.push((name, e));
                }
            }
        }

        // -- Backup tier: sequential fall-through ----------------------------
        for provider in &self.backup {
            let (name, result) = fetch_with_timeout(provider.as_ref(), self.timeout).await;
            match result {
                Ok(quote) => {
                    debug!(provider = %name, bid = quote.bid, ask = quote.ask, "backup tier quote accepted");
                    return Ok(quote);
                }
                Err(e) => {
                    warn!(provider = %name, error = %e, "backup provider failed");
                    failures.push((name, e));
                }
            }
        }

        Err(AllSourcesFailed { failures })
    }
}

async fn fetch_with_timeout(
    provider: &dyn RateProvider,
    timeout: Duration,
) -> (String, Result<Quote, ProviderError>) {
    let name = provider.name().to_string();
    let result = match tokio::time::timeout(timeout, provider.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    };
    (name, result)
}

// =============================================================================
// Shared parse helper
// =============================================================================

/// Parse a JSON value that may be either a string or a number into `f64`.
/// Several upstreams encode prices as JSON strings.
pub(crate) fn parse_price(val: &serde_json::Value, field: &str) -> Result<f64, ProviderError> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| ProviderError::Malformed(format!("field {field} is not a number: {s}"))),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ProviderError::Malformed(format!("field {field} is not a valid f64"))),
        _ => Err(ProviderError::Malformed(format!(
            "field {field} has unexpected JSON type"
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Stub provider returning a fixed quote or a fixed failure.
    struct StubProvider {
        name: &'static str,
        quote: Option<(f64, f64)>,
    }

    impl StubProvider {
        fn ok(name: &'static str, bid: f64, ask: f64) -> Box<dyn RateProvider> {
            Box::new(Self {
                name,
                quote: Some((bid, ask)),
            })
        }

        fn down(name: &'static str) -> Box<dyn RateProvider> {
            Box::new(Self { name, quote: None })
        }
    }

    #[async_trait]
    impl RateProvider for StubProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Quote, ProviderError> {
            match self.quote {
                Some((bid, ask)) => Quote::new(bid, ask, self.name, false).map_err(Into::into),
                None => Err(ProviderError::Unavailable("stub down".into())),
            }
        }
    }

    /// Stub that hangs until cancelled or timed out.
    struct HangingProvider;

    #[async_trait]
    impl RateProvider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn fetch(&self) -> Result<Quote, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn failing_primary_falls_through_to_backup() {
        let agg = Aggregator::new(
            vec![StubProvider::down("p1")],
            vec![StubProvider::ok("p2", 5.20, 5.20)],
            Duration::from_millis(100),
        );

        let quote = agg.fetch_quote().await.expect("backup should win");
        assert!((quote.bid - 5.20).abs() < f64::EPSILON);
        assert_eq!(quote.source, "p2");
    }

    #[tokio::test]
    async fn primary_race_survives_one_loser() {
        let agg = Aggregator::new(
            vec![StubProvider::down("p1"), StubProvider::ok("p2", 5.10, 5.12)],
            vec![],
            Duration::from_millis(100),
        );

        let quote = agg.fetch_quote().await.expect("p2 should win the race");
        assert_eq!(quote.source, "p2");
    }

    #[tokio::test]
    async fn hanging_primary_times_out_and_backup_serves() {
        let agg = Aggregator::new(
            vec![Box::new(HangingProvider)],
            vec![StubProvider::ok("backup", 5.0, 5.01)],
            Duration::from_millis(20),
        );

        let quote = agg.fetch_quote().await.expect("backup should serve");
        assert_eq!(quote.source, "backup");
    }

    #[tokio::test]
    async fn all_sources_failed_collects_every_provider() {
        let agg = Aggregator::new(
            vec![StubProvider::down("p1")],
            vec![StubProvider::down("p2"), StubProvider::down("p3")],
            Duration::from_millis(100),
        );

        let err = agg.fetch_quote().await.expect_err("everything is down");
        assert_eq!(err.failures.len(), 3);
        let names: Vec<&str> = err.failures.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn invalid_provider_data_counts_as_failure() {
        // p1 returns an inverted spread, which validation rejects.
        let agg = Aggregator::new(
            vec![StubProvider::ok("p1", 5.12, 5.10)],
            vec![StubProvider::ok("p2", 5.20, 5.21)],
            Duration::from_millis(100),
        );

        let quote = agg.fetch_quote().await.expect("p2 should serve");
        assert_eq!(quote.source, "p2");
    }

    #[test]
    fn parse_price_accepts_strings_and_numbers() {
        assert!((parse_price(&serde_json::json!("5.04"), "bid").unwrap() - 5.04).abs() < 1e-12);
        assert!((parse_price(&serde_json::json!(5.04), "bid").unwrap() - 5.04).abs() < 1e-12);
        assert!(parse_price(&serde_json::json!(null), "bid").is_err());
        assert!(parse_price(&serde_json::json!("abc"), "bid").is_err());
    }
}
