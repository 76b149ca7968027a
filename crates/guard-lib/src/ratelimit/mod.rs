//! Distributed fixed-window rate limiting
//!
//! Counts live in the shared [`CounterStore`](crate::store::CounterStore)
//! under `ratelimit:{resource}:{window_index}`, so every instance sharing the
//! store observes one monotonically increasing count per window.

mod limiter;

pub use limiter::{Decision, RateLimiter, WindowUsage};
