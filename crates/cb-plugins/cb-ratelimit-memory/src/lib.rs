//! # cb-ratelimit-memory
//!
//! Process-local implementation of `RateLimiter`.
//! Each key keeps the timestamps of its recent events; timestamps older than
//! the window are pruned on the next check for that key, and a periodic
//! cleanup drops keys that have gone quiet. State is lost on restart and is
//! not shared between instances.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cb_core::traits::{RateLimit, RateLimiter};
use dashmap::DashMap;
use tracing::debug;

/// Every this many checks, keys with no event inside their window are dropped.
const CLEANUP_INTERVAL: u64 = 100;

struct Bucket {
    window: Duration,
    hits: Vec<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.hits.retain(|seen| now.saturating_duration_since(*seen) < window);
    }
}

#[derive(Default)]
pub struct MemoryRateLimiter {
    buckets: DashMap<String, Bucket>,
    checks: AtomicU64,
}

impl MemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `check_and_record` with an explicit clock.
    pub fn check_and_record_at(&self, key: &str, limit: RateLimit, now: Instant) -> bool {
        let count = self.checks.fetch_add(1, Ordering::Relaxed) + 1;
        if count % CLEANUP_INTERVAL == 0 {
            self.cleanup_at(now);
        }

        let mut bucket = self.buckets.entry(key.to_owned()).or_insert_with(|| Bucket {
            window: limit.window,
            hits: Vec::new(),
        });
        bucket.window = limit.window;
        bucket.prune(now);
        if bucket.hits.len() >= limit.max {
            debug!(key, recent = bucket.hits.len(), "rate limit reached");
            return false;
        }
        bucket.hits.push(now);
        true
    }

    /// Drops every key whose events have all left their window.
    pub fn cleanup_at(&self, now: Instant) {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            bucket.prune(now);
            !bucket.hits.is_empty()
        });
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            debug!(evicted, tracked = self.buckets.len(), "rate limiter cleanup");
        }
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

impl RateLimiter for MemoryRateLimiter {
    fn check_and_record(&self, key: &str, limit: RateLimit) -> bool {
        self.check_and_record_at(key, limit, Instant::now())
    }
}
