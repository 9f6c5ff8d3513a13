//! Per-sender rate limiting
//!
//! Fixed one-minute windows: the counter for (sender, window start) is
//! incremented atomically and the post-increment count decides the outcome.
//! A count equal to the limit is still allowed. When the backing counter
//! store fails, the limiter fails open: throttling is protection, not a
//! correctness requirement.

use super::StoreError;
use crate::config::RATE_WINDOW_SECS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Within the limit, keep processing
    Allowed,
    /// Over the limit, notify and stop
    Throttled,
}

/// Atomic counter store keyed by string
///
/// `increment` must be a single server-side operation: create-at-one or
/// increment, returning the post-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increments the counter for `key` and returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` when the store is unreachable.
    async fn increment(&self, key: &str) -> Result<u64, StoreError>;
}

/// In-process counter store with automatic window expiry
pub struct MemoryCounterStore {
    counters: Cache<String, Arc<AtomicU64>>,
}

impl MemoryCounterStore {
    /// Creates a store expiring counters after `ttl_secs`, keeping at most
    /// `max_capacity` entries.
    #[must_use]
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let counters = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(std::time::Duration::from_secs(ttl_secs))
            .build();
        Self { counters }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<u64, StoreError> {
        let counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(async { Arc::new(AtomicU64::new(0)) })
            .await
            .into_value();
        Ok(counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Fixed-window rate limiter over a [`CounterStore`]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u64,
}

impl RateLimiter {
    /// Creates a limiter allowing `limit` messages per window per sender.
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, limit: u64) -> Self {
        Self { store, limit }
    }

    /// Counts one message from `sender` against the current window.
    pub async fn check_and_increment(&self, sender: &str) -> RateDecision {
        self.decide(sender, Utc::now()).await
    }

    async fn decide(&self, sender: &str, now: DateTime<Utc>) -> RateDecision {
        let window_start = floor_to_window(now);
        let key = format!("rate:{sender}:{window_start}");
        match self.store.increment(&key).await {
            Ok(count) if count <= self.limit => RateDecision::Allowed,
            Ok(count) => {
                warn!(
                    sender = %crate::utils::mask_sender(sender),
                    count,
                    limit = self.limit,
                    "Rate limit exceeded"
                );
                RateDecision::Throttled
            }
            // Fail open: a broken limiter must not block traffic.
            Err(e) => {
                warn!("Rate limit store failed, allowing message: {e}");
                RateDecision::Allowed
            }
        }
    }
}

/// Floors a timestamp to the start of its rate window (unix seconds).
fn floor_to_window(ts: DateTime<Utc>) -> i64 {
    let secs = ts.timestamp();
    secs - secs.rem_euclid(RATE_WINDOW_SECS as i64)
}
