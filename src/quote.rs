// =============================================================================
// Shared types used across the FX Relay service
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single priced observation for the tracked currency pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Best bid price. Always finite and > 0.
    pub bid: f64,
    /// Best ask price. Always finite, > 0, and >= bid.
    pub ask: f64,
    /// Label of the upstream source that produced this observation.
    pub source: String,
    /// When the upstream reported the price.
    pub observed_at: DateTime<Utc>,
    /// True when bid/ask were derived from a single midpoint via a
    /// synthetic spread rather than observed directly.
    pub synthetic: bool,
}

/// Validation failure for a candidate quote.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuoteError {
    #[error("price is not finite or not positive: {0}")]
    InvalidPrice(f64),

    #[error("bid {bid} exceeds ask {ask}")]
    InvertedSpread { bid: f64, ask: f64 },
}

impl Quote {
    /// Build a validated quote from an observed bid/ask pair.
    ///
    /// Rejects non-finite or non-positive prices and inverted spreads before
    /// the value can reach the cache or any subscriber.
    pub fn new(
        bid: f64,
        ask: f64,
        source: impl Into<String>,
        synthetic: bool,
    ) -> Result<Self, QuoteError> {
        for price in [bid, ask] {
            if !price.is_finite() || price <= 0.0 {
                return Err(QuoteError::InvalidPrice(price));
            }
        }
        if bid > ask {
            return Err(QuoteError::InvertedSpread { bid, ask });
        }

        Ok(Self {
            bid,
            ask,
            source: source.into(),
            observed_at: Utc::now(),
            synthetic,
        })
    }

    /// Derive a synthetic bid/ask pair from a midpoint-only source.
    ///
    /// The spread is `mid * spread_pct / 100`, applied symmetrically around
    /// the midpoint, and never narrower than `min_spread` (absolute price
    /// units; pass 0.0 to disable the floor).
    pub fn from_mid(
        mid: f64,
        spread_pct: f64,
        min_spread: f64,
        source: impl Into<String>,
    ) -> Result<Self, QuoteError> {
        if !mid.is_finite() || mid <= 0.0 {
            return Err(QuoteError::InvalidPrice(mid));
        }

        let spread = (mid * spread_pct / 100.0).max(min_spread);
        Self::new(mid - spread / 2.0, mid + spread / 2.0, source, true)
    }

    /// Absolute spread in price units.
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Midpoint between bid and ask.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

// =============================================================================
// Cache entry + wire payload
// =============================================================================

/// The cache's single slot: a quote plus the instant it was written.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    pub quote: Quote,
    pub last_update: DateTime<Utc>,
}

/// The JSON body served by `GET /quote` and pushed on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotePayload {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub timestamp: String,
    pub source: String,
    pub synthetic: bool,
    pub last_update: String,
}

impl QuotePayload {
    /// Flatten a cache entry into the viewer-facing payload shape.
    pub fn from_entry(symbol: &str, entry: &CacheEntry) -> Self {
        let spread = round6(entry.quote.ask - entry.quote.bid);
        Self {
            symbol: symbol.to_string(),
            bid: entry.quote.bid,
            ask: entry.quote.ask,
            spread,
            timestamp: entry.quote.observed_at.to_rfc3339(),
            source: entry.quote.source.clone(),
            synthetic: entry.quote.synthetic,
            last_update: entry.last_update.to_rfc3339(),
        }
    }
}

/// Round to six decimals so the serialized spread does not carry f64
/// subtraction noise.
fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_quote_accepted() {
        let q = Quote::new(5.10, 5.12, "test", false).unwrap();
        assert!((q.bid - 5.10).abs() < f64::EPSILON);
        assert!((q.ask - 5.12).abs() < f64::EPSILON);
        assert!(!q.synthetic);
        assert!(q.bid <= q.ask);
    }

    #[test]
    fn equal_bid_ask_accepted() {
        // A provider supplying a single price maps to bid == ask.
        let q = Quote::new(5.0, 5.0, "test", false).unwrap();
        assert!((q.spread()).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_non_positive_prices() {
        assert_eq!(
            Quote::new(0.0, 5.0, "test", false),
            Err(QuoteError::InvalidPrice(0.0))
        );
        assert_eq!(
            Quote::new(5.0, -1.0, "test", false),
            Err(QuoteError::InvalidPrice(-1.0))
        );
    }

    #[test]
    fn rejects_non_finite_prices() {
        assert!(Quote::new(f64::NAN, 5.0, "test", false).is_err());
        assert!(Quote::new(5.0, f64::INFINITY, "test", false).is_err());
    }

    #[test]
    fn rejects_inverted_spread() {
        assert_eq!(
            Quote::new(5.12, 5.10, "test", false),
            Err(QuoteError::InvertedSpread { bid: 5.12, ask: 5.10 })
        );
    }

    #[test]
    fn synthetic_spread_matches_configured_pct() {
        let mid = 5.0;
        let q = Quote::from_mid(mid, 0.5, 0.0, "mid-source").unwrap();
        assert!(q.synthetic);
        // ask - bid == mid * 0.5%
        assert!((q.spread() - mid * 0.005).abs() < 1e-12);
        // Symmetric around the midpoint.
        assert!((q.mid() - mid).abs() < 1e-12);
    }

    #[test]
    fn synthetic_spread_respects_floor() {
        let q = Quote::from_mid(5.0, 0.0001, 0.01, "mid-source").unwrap();
        assert!((q.spread() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn from_mid_rejects_bad_midpoint() {
        assert!(Quote::from_mid(0.0, 0.5, 0.0, "x").is_err());
        assert!(Quote::from_mid(f64::NAN, 0.5, 0.0, "x").is_err());
    }

    #[test]
    fn payload_spread_is_rounded() {
        let entry = CacheEntry {
            quote: Quote::new(5.10, 5.12, "test", false).unwrap(),
            last_update: Utc::now(),
        };
        let payload = QuotePayload::from_entry("USD-BRL", &entry);
        assert!((payload.spread - 0.02).abs() < f64::EPSILON);
        assert_eq!(payload.symbol, "USD-BRL");
        assert_eq!(payload.source, "test");
    }
}
