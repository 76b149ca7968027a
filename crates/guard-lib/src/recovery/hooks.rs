//! Dependency-specific remediation procedures
//!
//! The orchestrator treats these as opaque async steps that either succeed or
//! fail. Implementations live outside the core.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Remediation hooks invoked by the recovery orchestrator
#[async_trait]
pub trait RemediationHooks: Send + Sync {
    /// Confirm the dependency answers before its breaker is forced closed
    async fn check_dependency(&self, dependency: &str) -> Result<()>;

    /// Rotate credentials for `target`, or for everything when `None`
    async fn rotate_credentials(&self, target: Option<&str>) -> Result<()>;

    /// Ask the platform for more capacity
    async fn request_scale_out(&self) -> Result<()>;

    /// Restart the affected service
    async fn restart(&self, target: Option<&str>) -> Result<()>;
}

/// Hooks that only log and report success
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl RemediationHooks for LoggingHooks {
    async fn check_dependency(&self, dependency: &str) -> Result<()> {
        info!(dependency = %dependency, "Dependency check requested (no-op)");
        Ok(())
    }

    async fn rotate_credentials(&self, target: Option<&str>) -> Result<()> {
        info!(target = ?target, "Credential rotation requested (no-op)");
        Ok(())
    }

    async fn request_scale_out(&self) -> Result<()> {
        info!("Scale-out requested (no-op)");
        Ok(())
    }

    async fn restart(&self, target: Option<&str>) -> Result<()> {
        info!(target = ?target, "Restart requested (no-op)");
        Ok(())
    }
}
