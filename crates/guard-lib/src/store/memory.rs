//! In-process counter store
//!
//! Backs single-instance deployments and tests. Each key lives in its own
//! `DashMap` shard entry, so an increment holds only that shard's lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::CounterStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{GuardError, GuardResult};

#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    expires_at: DateTime<Utc>,
}

/// Counter store held in local memory
pub struct InMemoryCounterStore {
    counters: DashMap<String, Counter>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
    expose_clock: bool,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl InMemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
            available: AtomicBool::new(true),
            expose_clock: false,
        }
    }

    /// Report this store's clock through `store_time`
    pub fn with_store_clock(mut self) -> Self {
        self.expose_clock = true;
        self
    }

    /// Simulate the store going away or coming back
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live keys, expired ones included until purged
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Drop every expired key
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.counters.len();
        self.counters.retain(|_, c| c.expires_at > now);
        let purged = before - self.counters.len();
        if purged > 0 {
            debug!(purged, "Purged expired counters");
        }
        purged
    }

    fn check_available(&self) -> GuardResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GuardError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_with_expiry(&self, key: &str, by: u64, ttl: Duration) -> GuardResult<u64> {
        self.check_available()?;

        let now = self.clock.now();
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::zero());

        let mut entry = self.counters.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: now + ttl,
        });
        if entry.expires_at <= now {
            *entry = Counter {
                value: 0,
                expires_at: now + ttl,
            };
        }
        entry.value = entry.value.saturating_add(by);
        Ok(entry.value)
    }

    async fn get(&self, key: &str) -> GuardResult<Option<u64>> {
        self.check_available()?;

        let now = self.clock.now();
        Ok(self
            .counters
            .get(key)
            .filter(|c| c.expires_at > now)
            .map(|c| c.value))
    }

    async fn store_time(&self) -> GuardResult<Option<DateTime<Utc>>> {
        self.check_available()?;
        Ok(self.expose_clock.then(|| self.clock.now()))
    }
}
