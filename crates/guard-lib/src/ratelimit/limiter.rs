//! Fixed-window limiter over the shared counter store
//!
//! `window_index = floor(now / window)`. Over-limit increments are not rolled
//! back: denied requests still consume tracking.
//!
//! Time comes from the store's clock when it exposes one. Otherwise instance
//! clocks are assumed to agree to within one window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::config::RateLimitConfig;
use crate::error::{GuardError, GuardResult};
use crate::observability::{GuardMetrics, StructuredLogger};
use crate::store::CounterStore;

/// How often the offset to the store's clock is re-measured
const CLOCK_RECALIBRATE: Duration = Duration::from_secs(300);

/// Result of a permit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Within budget
    Allowed {
        remaining: u64,
        resets_at: DateTime<Utc>,
    },
    /// Store unreachable and the limiter is failing open
    Degraded,
    /// Budget spent for this window
    Denied { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Denied { .. })
    }
}

/// Current window usage for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub resource: String,
    pub window_index: i64,
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct ClockOffset {
    offset: ChronoDuration,
    measured_at: DateTime<Utc>,
}

/// Per-resource request budget shared across instances
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    offset: Mutex<Option<ClockOffset>>,
    degraded: AtomicBool,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            offset: Mutex::new(None),
            degraded: AtomicBool::new(false),
            metrics: GuardMetrics::new(),
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// True while the last store interaction failed
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Spend `cost` units of `resource`'s budget
    pub async fn try_acquire(&self, resource: &str, cost: u64) -> GuardResult<Decision> {
        let limit = self.config.limit_for(resource);
        let now = self.now().await;
        let (index, resets_at, retry_after) = self.window_at(now);
        let key = window_key(resource, index);

        match self
            .store
            .incr_with_expiry(&key, cost, self.config.window())
            .await
        {
            Ok(count) => {
                self.mark_store_ok();
                if count <= limit {
                    Ok(Decision::Allowed {
                        remaining: limit - count,
                        resets_at,
                    })
                } else {
                    debug!(resource = %resource, count, limit, "Rate limit exceeded");
                    self.metrics.inc_rate_limit_denials(resource);
                    Ok(Decision::Denied { retry_after })
                }
            }
            Err(e) => self.degraded_decision(resource, e),
        }
    }

    /// Spend one unit
    pub async fn try_acquire_one(&self, resource: &str) -> GuardResult<Decision> {
        self.try_acquire(resource, 1).await
    }

    /// Like `try_acquire`, with denial turned into `RateLimitExceeded`
    pub async fn acquire(&self, resource: &str, cost: u64) -> GuardResult<()> {
        match self.try_acquire(resource, cost).await? {
            Decision::Allowed { .. } | Decision::Degraded => Ok(()),
            Decision::Denied { retry_after } => Err(GuardError::RateLimitExceeded {
                resource: resource.to_string(),
                retry_after,
            }),
        }
    }

    /// Read the current window without spending budget
    pub async fn usage(&self, resource: &str) -> GuardResult<WindowUsage> {
        let limit = self.config.limit_for(resource);
        let now = self.now().await;
        let (index, resets_at, _) = self.window_at(now);
        let count = self
            .store
            .get(&window_key(resource, index))
            .await?
            .unwrap_or(0);

        Ok(WindowUsage {
            resource: resource.to_string(),
            window_index: index,
            count,
            limit,
            remaining: limit.saturating_sub(count),
            resets_at,
        })
    }

    fn degraded_decision(&self, resource: &str, err: GuardError) -> GuardResult<Decision> {
        self.metrics.inc_store_degraded();
        let newly_degraded = !self.degraded.swap(true, Ordering::SeqCst);
        if newly_degraded {
            self.logger
                .log_store_degraded(resource, &err.to_string(), self.config.fail_open);
        } else {
            debug!(resource = %resource, error = %err, "Counter store still unreachable");
        }

        if self.config.fail_open {
            Ok(Decision::Degraded)
        } else {
            Err(err)
        }
    }

    fn mark_store_ok(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            tracing::info!("Counter store reachable again, rate limiter leaving degraded mode");
        }
    }

    /// Window index, its end, and the time left until that end
    fn window_at(&self, now: DateTime<Utc>) -> (i64, DateTime<Utc>, Duration) {
        let window_ms = (self.config.window().as_millis() as i64).max(1);
        let now_ms = now.timestamp_millis();
        let index = now_ms.div_euclid(window_ms);
        let boundary_ms = (index + 1) * window_ms;
        let resets_at = DateTime::from_timestamp_millis(boundary_ms).unwrap_or(now);
        let retry_after = Duration::from_millis((boundary_ms - now_ms) as u64);
        (index, resets_at, retry_after)
    }

    /// Local time corrected by the store's clock offset, when known
    async fn now(&self) -> DateTime<Utc> {
        let local = self.clock.now();
        let cached = *self.offset.lock().unwrap_or_else(|p| p.into_inner());

        let stale = cached
            .map(|c| crate::clock::elapsed_between(c.measured_at, local) >= CLOCK_RECALIBRATE)
            .unwrap_or(true);
        if !stale {
            return local + cached.map(|c| c.offset).unwrap_or_else(ChronoDuration::zero);
        }

        let offset = match self.store.store_time().await {
            Ok(Some(store_now)) => store_now - local,
            _ => ChronoDuration::zero(),
        };
        *self.offset.lock().unwrap_or_else(|p| p.into_inner()) = Some(ClockOffset {
            offset,
            measured_at: local,
        });
        local + offset
    }
}

fn window_key(resource: &str, index: i64) -> String {
    format!("ratelimit:{}:{}", resource, index)
}
