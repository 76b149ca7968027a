//! Auto-recovery orchestration
//!
//! Procedure table keyed by incident type:
//! - dependency-failure: confirm the dependency answers, then force its breaker closed
//! - resource-exhaustion: request scale-out
//! - security-event: rotate credentials, then force any non-closed breaker closed
//! - anomaly: restart

mod hooks;
mod orchestrator;


pub use hooks::{LoggingHooks, RemediationHooks};
pub use orchestrator::{RecoveryOrchestrator, RecoveryOrchestratorBuilder};
