//! Resilience agent: component wiring, remediation hooks and the HTTP API

pub mod api;
pub mod config;
pub mod hooks;
pub mod plane;

pub use api::{create_router, AppState};
pub use config::AgentConfig;
pub use hooks::HttpRemediationHooks;
pub use plane::Plane;
