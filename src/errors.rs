// =============================================================================
// Typed errors for the distribution pipeline
// =============================================================================
//
// Provider failures are data, not control flow: the aggregator walks its
// provider tiers collecting these and only surfaces `AllSourcesFailed` once
// every tier is exhausted. anyhow stays at the binary boundary (main.rs).

use thiserror::Error;

/// A single provider call failed. Recovered locally by falling through to the
/// next provider; never surfaced past the aggregator on its own.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Unavailable(String),

    #[error("timed out")]
    Timeout,

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

impl From<crate::quote::QuoteError> for ProviderError {
    fn from(err: crate::quote::QuoteError) -> Self {
        ProviderError::Malformed(err.to_string())
    }
}

/// Every configured provider, primary and backup, failed or returned invalid
/// data. Carries the per-provider failure list for logging and diagnostics.
#[derive(Debug)]
pub struct AllSourcesFailed {
    pub failures: Vec<(String, ProviderError)>,
}

impl std::fmt::Display for AllSourcesFailed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "all {} quote sources failed", self.failures.len())?;
        for (name, err) in &self.failures {
            write!(f, "; {name}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AllSourcesFailed {}

/// Failure of the persistent ingestion link. Transient variants trigger
/// bounded reconnection; the worker reports terminal failure only after the
/// retry ceiling is exceeded.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("link closed by upstream")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sources_failed_lists_providers() {
        let err = AllSourcesFailed {
            failures: vec![
                ("binance".into(), ProviderError::Timeout),
                ("er-api".into(), ProviderError::Unavailable("refused".into())),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("all 2 quote sources failed"));
        assert!(msg.contains("binance: timed out"));
        assert!(msg.contains("er-api: request failed: refused"));
    }
}
