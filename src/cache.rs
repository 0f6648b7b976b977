// =============================================================================
// Single-slot quote cache
// =============================================================================
//
// The one authoritative copy of the latest normalized quote. The update worker
// is the only writer; endpoints and the broadcast hub read. Reads never touch
// the network — all upstream I/O happens out-of-band in the worker, so a
// viewer-facing read has bounded latency regardless of upstream health.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::quote::{CacheEntry, Quote};

/// `{ has_data, last_update }` summary for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub has_data: bool,
    pub last_update: Option<DateTime<Utc>>,
}

/// Single-slot in-memory cache. Empty until the first successful update;
/// each update replaces the whole entry, never merges.
pub struct QuoteCache {
    slot: RwLock<Option<CacheEntry>>,
}

impl QuoteCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Atomically replace the cached entry with a fresh one built from
    /// `quote`. Returns the entry that was stored.
    pub fn update(&self, quote: Quote) -> CacheEntry {
        let entry = CacheEntry {
            quote,
            last_update: Utc::now(),
        };
        *self.slot.write() = Some(entry.clone());
        entry
    }

    /// Read the current entry, if any. Never performs I/O.
    pub fn read(&self) -> Option<CacheEntry> {
        self.slot.read().clone()
    }

    pub fn status(&self) -> CacheStatus {
        let slot = self.slot.read();
        CacheStatus {
            has_data: slot.is_some(),
            last_update: slot.as_ref().map(|e| e.last_update),
        }
    }

    /// Clear the slot. Test hook — the cache never empties on its own once
    /// populated.
    pub fn reset(&self) {
        *self.slot.write() = None;
    }
}

impl Default for QuoteCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote::new(bid, ask, "test", false).unwrap()
    }

    #[test]
    fn starts_empty() {
        let cache = QuoteCache::new();
        assert!(cache.read().is_none());
        assert!(!cache.status().has_data);
        assert!(cache.status().last_update.is_none());
    }

    #[test]
    fn read_after_update_returns_exactly_what_was_written() {
        let cache = QuoteCache::new();
        cache.update(quote(5.10, 5.12));

        let entry = cache.read().expect("populated");
        assert!((entry.quote.bid - 5.10).abs() < f64::EPSILON);
        assert!((entry.quote.ask - 5.12).abs() < f64::EPSILON);
        assert_eq!(entry.quote.source, "test");
    }

    #[test]
    fn update_replaces_wholesale() {
        let cache = QuoteCache::new();
        cache.update(quote(5.10, 5.12));
        cache.update(Quote::new(5.20, 5.25, "other", true).unwrap());

        let entry = cache.read().expect("populated");
        assert!((entry.quote.bid - 5.20).abs() < f64::EPSILON);
        assert_eq!(entry.quote.source, "other");
        assert!(entry.quote.synthetic);
    }

    #[test]
    fn stays_populated_until_reset() {
        let cache = QuoteCache::new();
        cache.update(quote(5.0, 5.01));
        assert!(cache.status().has_data);

        cache.reset();
        assert!(cache.read().is_none());
        assert!(!cache.status().has_data);
    }
}
