// =============================================================================
// AwesomeAPI provider — bid/ask for fiat pairs
// =============================================================================

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ProviderError;
use crate::providers::{parse_price, RateProvider};
use crate::quote::Quote;

const SOURCE: &str = "awesomeapi";

/// Fetches the latest bid/ask for a fiat pair from
/// `GET /json/last/{BASE}-{QUOTE}`.
pub struct AwesomeApiProvider {
    client: reqwest::Client,
    base_url: String,
    base_ccy: String,
    quote_ccy: String,
}

impl AwesomeApiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        base_ccy: String,
        quote_ccy: String,
    ) -> Self {
        Self {
            client,
            base_url,
            base_ccy,
            quote_ccy,
        }
    }
}

#[async_trait]
impl RateProvider for AwesomeApiProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self) -> Result<Quote, ProviderError> {
        let url = format!(
            "{}/json/last/{}-{}",
            self.base_url, self.base_ccy, self.quote_ccy
        );

        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("HTTP {status}")));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let quote = parse_last_quote(&body, &self.base_ccy, &self.quote_ccy)?;
        debug!(pair = format!("{}-{}", self.base_ccy, self.quote_ccy), bid = quote.bid, ask = quote.ask, "awesomeapi quote fetched");
        Ok(quote)
    }
}

/// The response is keyed by the concatenated pair. Expected shape:
/// ```json
/// { "USDBRL": { "code": "USD", "codein": "BRL", "bid": "5.0313",
///               "ask": "5.0323", "timestamp": "1700000000" } }
/// ```
fn parse_last_quote(
    body: &serde_json::Value,
    base_ccy: &str,
    quote_ccy: &str,
) -> Result<Quote, ProviderError> {
    let key = format!("{base_ccy}{quote_ccy}");
    let entry = body
        .get(&key)
        .ok_or_else(|| ProviderError::Malformed(format!("response missing key {key}")))?;

    let bid = parse_price(&entry["bid"], "bid")?;
    let ask = parse_price(&entry["ask"], "ask")?;
    Quote::new(bid, ask, SOURCE, false).map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_last_quote_body() {
        let body = serde_json::json!({
            "USDBRL": {
                "code": "USD",
                "codein": "BRL",
                "bid": "5.0313",
                "ask": "5.0323",
                "timestamp": "1700000000"
            }
        });

        let quote = parse_last_quote(&body, "USD", "BRL").unwrap();
        assert!((quote.bid - 5.0313).abs() < 1e-12);
        assert!((quote.ask - 5.0323).abs() < 1e-12);
        assert_eq!(quote.source, "awesomeapi");
    }

    #[test]
    fn rejects_wrong_pair_key() {
        let body = serde_json::json!({ "EURBRL": { "bid": "5.4", "ask": "5.5" } });
        assert!(parse_last_quote(&body, "USD", "BRL").is_err());
    }

    #[test]
    fn rejects_inverted_quote() {
        let body = serde_json::json!({
            "USDBRL": { "bid": "5.10", "ask": "5.05" }
        });
        assert!(parse_last_quote(&body, "USD", "BRL").is_err());
    }
}
