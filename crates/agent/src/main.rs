//! Resilience Agent - rate limiting, circuit breaking, health monitoring,
//! incident tracking and auto-recovery for one service and its dependencies

use std::sync::Arc;

use anyhow::{Context, Result};
use guard_lib::monitor::ProcMetricsSource;
use guard_lib::{RemediationHooks, StructuredLogger};
use resilience_agent::{api, AgentConfig, HttpRemediationHooks, Plane};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resilience-agent");

    let config = AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        dependencies = config.dependencies.len(),
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.node_name);
    logger.log_startup(AGENT_VERSION);

    let hooks: Arc<dyn RemediationHooks> = Arc::new(
        HttpRemediationHooks::new(
            config.dependencies.clone(),
            config.dependency_health_path.clone(),
            config.webhooks.clone(),
        )
        .context("Failed to create remediation hooks")?,
    );

    let plane = Plane::build(&config, hooks, Arc::new(ProcMetricsSource::new()))?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let (state, handles) = plane.start(&shutdown_tx).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, state, shutdown_tx.subscribe()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.log_shutdown("SIGINT received");
    info!("Shutting down");

    // Err only when every receiver is already gone
    let _ = shutdown_tx.send(());
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server stopped with an error"),
        Err(e) => warn!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    Ok(())
}
