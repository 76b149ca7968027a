//! Protected-call path
//!
//! Every outbound call to a dependency goes through the rate limiter, then the
//! dependency's circuit breaker, then the call itself. Outcomes feed the
//! breaker and the traffic statistics sampled by the health monitor.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use crate::breaker::BreakerRegistry;
use crate::error::CallError;
use crate::monitor::TrafficRecorder;
use crate::ratelimit::{Decision, RateLimiter};

/// Chains rate limiting and circuit breaking in front of upstream calls
#[derive(Clone)]
pub struct Guard {
    limiter: Arc<RateLimiter>,
    breakers: BreakerRegistry,
    traffic: TrafficRecorder,
}

impl Guard {
    pub fn new(limiter: Arc<RateLimiter>, breakers: BreakerRegistry, traffic: TrafficRecorder) -> Self {
        Self {
            limiter,
            breakers,
            traffic,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn traffic(&self) -> &TrafficRecorder {
        &self.traffic
    }

    /// Call `dependency`, spending one unit of `resource`'s budget
    pub async fn call<T, E, F>(
        &self,
        dependency: &str,
        resource: &str,
        call: F,
    ) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        match self.limiter.try_acquire_one(resource).await {
            Ok(Decision::Denied { retry_after }) => {
                return Err(CallError::RateLimited { retry_after });
            }
            Ok(Decision::Allowed { .. }) | Ok(Decision::Degraded) => {}
            Err(e) => return Err(CallError::Store(e.to_string())),
        }

        let permit = self
            .breakers
            .acquire(dependency)
            .map_err(CallError::from_guard)?;

        let start = Instant::now();
        let result = call.await;
        let elapsed = start.elapsed();
        let success = result.is_ok();

        permit.record(success);
        self.traffic.record(dependency, success, elapsed);
        debug!(
            dependency = %dependency,
            success,
            elapsed_ms = elapsed.as_millis() as u64,
            "Protected call finished"
        );

        result.map_err(CallError::Upstream)
    }
}
