// =============================================================================
// Book-ticker provider — real bid/ask from the exchange REST API
// =============================================================================

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ProviderError;
use crate::providers::{parse_price, RateProvider};
use crate::quote::Quote;

const SOURCE: &str = "binance";

/// Fetches the best bid/ask for an exchange ticker (e.g. `USDTBRL`) from
/// `GET /api/v3/ticker/bookTicker`.
pub struct BookTickerProvider {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
}

impl BookTickerProvider {
    pub fn new(client: reqwest::Client, base_url: String, symbol: String) -> Self {
        Self {
            client,
            base_url,
            symbol,
        }
    }
}

#[async_trait]
impl RateProvider for BookTickerProvider {
    fn name(&self) -> &str {
        SOURCE
    }

    async fn fetch(&self) -> Result<Quote, ProviderError> {
        let url = format!(
            "{}/api/v3/ticker/bookTicker?symbol={}",
            self.base_url, self.symbol
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

        let quote = parse_book_ticker(&body)?;
        debug!(symbol = %self.symbol, bid = quote.bid, ask = quote.ask, "book ticker fetched");
        Ok(quote)
    }
}

/// Expected shape:
/// ```json
/// { "symbol": "USDTBRL", "bidPrice": "5.0421", "bidQty": "880.6",
///   "askPrice": "5.0436", "askQty": "112.3" }
/// ```
fn parse_book_ticker(body: &serde_json::Value) -> Result<Quote, ProviderError> {
    let bid = parse_price(&body["bidPrice"], "bidPrice")?;
    let ask = parse_price(&body["askPrice"], "askPrice")?;
    Quote::new(bid, ask, SOURCE, false).map_err(Into::into)
}
