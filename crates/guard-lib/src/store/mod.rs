//! Shared counter store
//!
//! The only cross-instance mutable state the limiter relies on. Increments
//! must be a single atomic round trip that returns the post-increment value;
//! read-then-write would let concurrent instances overshoot a limit.

mod memory;

pub use memory::InMemoryCounterStore;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::GuardResult;

/// Key/value counter store with atomic increment-with-expiry
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `by` to `key`, creating it with `ttl` if absent, and return the new value
    async fn incr_with_expiry(&self, key: &str, by: u64, ttl: Duration) -> GuardResult<u64>;

    /// Current value of `key`, `None` if absent or expired
    async fn get(&self, key: &str) -> GuardResult<Option<u64>>;

    /// Store-side clock, when the store exposes one
    async fn store_time(&self) -> GuardResult<Option<DateTime<Utc>>> {
        Ok(None)
    }
}
