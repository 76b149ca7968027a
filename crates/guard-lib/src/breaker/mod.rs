//! Per-dependency circuit breakers
//!
//! A breaker stops calls to a failing dependency after enough consecutive
//! failures, waits out a reset timeout, then lets a few probes through
//! before closing again. Every state change is appended to an ordered
//! transition log.

mod registry;
mod state;

pub use registry::{BreakerRegistry, BreakerRegistryBuilder, Permit};
pub use state::{BreakerSnapshot, CircuitState, Transition, TransitionCause};
