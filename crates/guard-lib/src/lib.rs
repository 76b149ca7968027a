//! Resilience control plane for calls to unreliable upstream dependencies
//!
//! This crate provides:
//! - Cross-instance fixed-window rate limiting over a shared counter store
//! - Per-dependency circuit breakers with an ordered transition log
//! - Periodic health sampling with threshold alerts
//! - Incident tracking with an append-only response timeline
//! - Incident-driven auto-recovery with bounded retries
//! - Component health checks and observability

pub mod breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod guard;
pub mod health;
pub mod incident;
pub mod journal;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod ratelimit;
pub mod recovery;
pub mod store;

pub use breaker::{BreakerRegistry, BreakerSnapshot, CircuitState, Permit, Transition, TransitionCause};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GuardConfig;
pub use error::{CallError, GuardError, GuardResult};
pub use events::{BroadcastSink, EventSink, NullSink, PlaneEvent};
pub use guard::Guard;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use incident::{IncidentManager, StatusChange};
pub use models::*;
pub use monitor::{HealthMonitor, HealthReport, HealthStatus, MetricsSource, TrafficRecorder};
pub use observability::{GuardMetrics, StructuredLogger};
pub use ratelimit::{Decision, RateLimiter, WindowUsage};
pub use recovery::{LoggingHooks, RecoveryOrchestrator, RemediationHooks};
pub use store::{CounterStore, InMemoryCounterStore};
