// =============================================================================
// ER-API provider — midpoint-only backup with synthetic spread
// =============================================================================
//
// The open exchange-rate API reports a single reference rate per currency,
// so the quote it produces is tagged synthetic: bid/ask are derived from the
// midpoint via the configured symmetric spread.

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ProviderError;
use crate::providers::RateProvider;
use crate::quote::Quote;

const SOURCE: &str = "er-api";

/// Fetches the reference rate from `GET /v6/latest/{BASE}` and derives a
/// synthetic bid/ask pair.
pub struct ErApiProvider {
    client: reqwest::Client,
    base_url: String,
    base_ccy: String,
    quote_ccy: String,
    spread_pct: f64,
    min_spread: f64,
}

impl ErApiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        base_ccy: String,
        quote_ccy: String,
        spread_pct: f64,
        min_spread: f64,
    ) -> Self {
        Self {
            client,
            base_url,
            base_ccy,
            quote_ccy,
            spread_pct,
            min_spread,
        }
    }
}

#[async_trait]
impl RateProvider for ErApiProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self) -> Result<Quote, ProviderError> {
        let url = format!("{}/v6/latest/{}", self.base_url, self.base_ccy);

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("HTTP {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let quote = parse_latest_rates(&body, &self.quote_ccy, self.spread_pct, self.min_spread)?;
        debug!(quote_ccy = %self.quote_ccy, mid = quote.mid(), "er-api reference rate fetched");
        Ok(quote)
    }
}

/// Expected shape:
/// ```json
/// { "result": "success", "base_code": "USD",
///   "rates": { "BRL": 5.0321, "EUR": 0.92, ... } }
/// ```
fn parse_latest_rates(
    body: &serde_json::Value,
    quote_ccy: &str,
    spread_pct: f64,
    min_spread: f64,
) -> Result<Quote, ProviderError> {
    if body["result"].as_str() != Some("success") {
        return Err(ProviderError::Malformed(format!(
            "result is not success: {}",
            body["result"]
        )));
    }

    let mid = body["rates"][quote_ccy]
        .as_f64()
        .ok_or_else(|| ProviderError::Malformed(format!("rates missing {quote_ccy}")))?;

    Quote::from_mid(mid, spread_pct, min_spread, SOURCE).map_err(Into::into)
}
