// Per-credential request limiting for batch ingestion
// Uses a token bucket per credential, refilled once per window

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Rate limiter configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum requests per window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
    /// Whether rate limiting is enabled
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Token bucket for rate limiting
struct TokenBucket {
    tokens: u32,
    last_refill: Instant,
    max_tokens: u32,
    refill_interval: Duration,
}

impl TokenBucket {
    fn new(max_tokens: u32, refill_interval: Duration) -> Self {
        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_interval,
        }
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Instant) {
        if now.duration_since(self.last_refill) >= self.refill_interval {
            self.tokens = self.max_tokens;
            self.last_refill = now;
        }
    }

    /// Whole seconds until the next refill, at least 1
    fn retry_after(&self, now: Instant) -> u64 {
        let wait = self
            .refill_interval
            .saturating_sub(now.duration_since(self.last_refill));
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Token buckets keyed by credential name
///
/// Idle buckets are swept at most once per window, from `check`.
pub struct CredentialRateLimiter {
    buckets: DashMap<String, TokenBucket>,
    config: RateLimitConfig,
    last_sweep: Mutex<Instant>,
}

impl CredentialRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Consume one request for `key`.
    ///
    /// Returns the requests left in the window, or the seconds to wait.
    pub fn check(&self, key: &str) -> Result<u32, u64> {
        if !self.config.enabled {
            return Ok(self.config.max_requests);
        }

        let now = Instant::now();
        self.sweep_if_due(now);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(self.config.max_requests, self.config.window));

        if bucket.try_consume(now) {
            Ok(bucket.tokens)
        } else {
            Err(bucket.retry_after(now))
        }
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.duration_since(*last_sweep) < self.config.window {
                return;
            }
            *last_sweep = now;
        }
        self.cleanup();
    }

    /// Drop buckets idle for more than two windows
    pub fn cleanup(&self) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < self.config.window * 2);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Idle rate limit buckets dropped");
        }
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window: Duration) -> CredentialRateLimiter {
        CredentialRateLimiter::new(RateLimitConfig {
            max_requests,
            window,
            enabled: true,
        })
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.max_requests, 60);
        assert_eq!(config.window, Duration::from_secs(60));
        assert!(config.enabled);
    }

    #[test]
    fn test_exhausts_per_credential() {
        let limiter = limiter(2, Duration::from_secs(60));
        assert_eq!(limiter.check("ci-runner"), Ok(1));
        assert_eq!(limiter.check("ci-runner"), Ok(0));

        let retry_after = limiter.check("ci-runner").unwrap_err();
        assert!((1..=60).contains(&retry_after));

        // Other credentials have their own bucket
        assert_eq!(limiter.check("implant-sync"), Ok(1));
    }

    #[test]
    fn test_refills_after_window() {
        let limiter = limiter(1, Duration::from_millis(20));
        assert!(limiter.check("k").is_ok());
        assert!(limiter.check("k").is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.check("k").is_ok());
    }

    #[test]
    fn test_disabled_always_allows() {
        let limiter = CredentialRateLimiter::new(RateLimitConfig {
            max_requests: 1,
            window: Duration::from_secs(60),
            enabled: false,
        });
        for _ in 0..5 {
            assert_eq!(limiter.check("k"), Ok(1));
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_cleanup_drops_idle_buckets() {
        let limiter = limiter(5, Duration::from_millis(5));
        limiter.check("a").unwrap();
        std::thread::sleep(Duration::from_millis(15));
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn test_check_sweeps_idle_buckets() {
        let limiter = limiter(5, Duration::from_millis(10));
        for key in ["a", "b", "c"] {
            limiter.check(key).unwrap();
        }
        assert_eq!(limiter.tracked(), 3);

        std::thread::sleep(Duration::from_millis(30));
        limiter.check("d").unwrap();
        assert_eq!(limiter.tracked(), 1);
    }
}
