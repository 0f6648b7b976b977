// =============================================================================
// Per-identity rate limiter for the pull-style read endpoint
// =============================================================================
//
// Fixed-window counter keyed by client identity. The default budget is
// 30 admissions per 60 s window. Exceeding the budget yields a rejection
// carrying a retry hint, never an error path. The streaming endpoint is not
// covered here — its admission policy is the hub's one-per-identity rule.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

/// Prune expired windows once the map grows past this many identities.
const PRUNE_THRESHOLD: usize = 1024;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Seconds until the caller's window rolls over. Zero when allowed.
    pub retry_after_secs: u64,
}

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one request for `identity`.
    pub fn allow(&self, identity: &str) -> Decision {
        let now = Instant::now();
        let mut windows = self.windows.lock();

        if windows.len() > PRUNE_THRESHOLD {
            let window = self.window;
            windows.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = windows.entry(identity.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        // Roll the window over once it has aged out.
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count < self.max_requests {
            entry.count += 1;
            return Decision {
                allowed: true,
                retry_after_secs: 0,
            };
        }

        let elapsed = now.duration_since(entry.started);
        let remaining = self.window.saturating_sub(elapsed);
        let retry_after_secs = remaining.as_secs().max(1);

        warn!(
            identity = %identity,
            limit = self.max_requests,
            retry_after_secs,
            "request rejected — rate limit exceeded"
        );

        Decision {
            allowed: false,
            retry_after_secs,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));

        for _ in 0..30 {
            assert!(limiter.allow("1.2.3.4").allowed);
        }

        let rejected = limiter.allow("1.2.3.4");
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_secs >= 1);
    }

    #[test]
    fn identities_are_independent() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.allow("a").allowed);
        assert!(limiter.allow("a").allowed);
        assert!(!limiter.allow("a").allowed);

        // A different identity still has a full budget.
        assert!(limiter.allow("b").allowed);
    }

    #[test]
    fn window_rolls_over() {
        let limiter = RateLimiter::new(1, Duration::from_millis(40));

        assert!(limiter.allow("a").allowed);
        assert!(!limiter.allow("a").allowed);

        std::thread::sleep(Duration::from_millis(50));
        assert!(limiter.allow("a").allowed);
    }

    #[test]
    fn retry_hint_never_zero_on_rejection() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        limiter.allow("a");

        let rejected = limiter.allow("a");
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_secs >= 1);
        assert!(rejected.retry_after_secs <= 60);
    }
}
