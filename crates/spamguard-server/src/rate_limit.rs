//! Per-client rate limiting over a sliding window.
//!
//! Each client address owns a time-ordered list of request timestamps in a
//! concurrent map. Entries older than the window are pruned lazily on each
//! check, so the list is bounded by the configured request budget.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use spamguard_core::RateLimitConfig;
use tracing::debug;

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Request may proceed.
    Allowed,
    /// Budget exhausted for the current window.
    Limited {
        /// Seconds until the oldest counted request leaves the window.
        retry_after_secs: u64,
    },
}

/// Sliding-window rate limiter keyed by client address.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Vec<Instant>>,
}

impl RateLimiter {
    /// Create a limiter with the given configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            config: config.clone(),
            windows: DashMap::new(),
        }
    }

    /// Check (and record) a request from `client`.
    pub fn check(&self, client: &str) -> RateLimitDecision {
        self.check_at(client, Instant::now())
    }

    /// Check against an explicit clock reading. `now` must not move
    /// backwards between calls for a given client.
    pub fn check_at(&self, client: &str, now: Instant) -> RateLimitDecision {
        if !self.config.enabled || self.config.max_requests == 0 {
            return RateLimitDecision::Allowed;
        }

        let window = Duration::from_secs(self.config.window_seconds);
        let mut timestamps = self.windows.entry(client.to_string()).or_default();
        timestamps.retain(|&ts| now.duration_since(ts) < window);

        if timestamps.len() >= self.config.max_requests {
            let oldest = timestamps[0];
            let retry_after = window.saturating_sub(now.duration_since(oldest));
            debug!(client, retry_after_secs = retry_after.as_secs(), "rate limited");
            RateLimitDecision::Limited {
                retry_after_secs: retry_after.as_secs().max(1),
            }
        } else {
            timestamps.push(now);
            RateLimitDecision::Allowed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
