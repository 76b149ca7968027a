//! Remediation hooks backed by HTTP
//!
//! Dependency checks GET the dependency's health URL. Scale-out, restart and
//! credential rotation POST to operator-configured webhooks.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use guard_lib::RemediationHooks;
use serde_json::json;
use tracing::{debug, info};

use crate::config::WebhookConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpRemediationHooks {
    client: reqwest::Client,
    dependencies: HashMap<String, String>,
    health_path: String,
    webhooks: WebhookConfig,
}

impl HttpRemediationHooks {
    pub fn new(
        dependencies: HashMap<String, String>,
        health_path: impl Into<String>,
        webhooks: WebhookConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            dependencies,
            health_path: health_path.into(),
            webhooks,
        })
    }

    async fn post_webhook(
        &self,
        hook: &str,
        url: Option<&String>,
        body: serde_json::Value,
    ) -> Result<()> {
        let Some(url) = url else {
            info!(hook = %hook, "No webhook configured, nothing to call");
            return Ok(());
        };

        debug!(hook = %hook, url = %url, "Calling remediation webhook");
        self.client
            .post(url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} webhook unreachable", hook))?
            .error_for_status()
            .with_context(|| format!("{} webhook rejected the request", hook))?;
        Ok(())
    }
}

/// Join a base URL and a path without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[async_trait]
impl RemediationHooks for HttpRemediationHooks {
    async fn check_dependency(&self, dependency: &str) -> Result<()> {
        let base = self
            .dependencies
            .get(dependency)
            .with_context(|| format!("no URL configured for dependency {}", dependency))?;
        let url = join_url(base, &self.health_path);

        self.client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("{} health check unreachable", dependency))?
            .error_for_status()
            .with_context(|| format!("{} health check failed", dependency))?;
        info!(dependency = %dependency, "Dependency answered its health check");
        Ok(())
    }

    async fn rotate_credentials(&self, target: Option<&str>) -> Result<()> {
        self.post_webhook(
            "rotate_credentials",
            self.webhooks.rotate_credentials.as_ref(),
            json!({ "action": "rotate_credentials", "target": target }),
        )
        .await
    }

    async fn request_scale_out(&self) -> Result<()> {
        self.post_webhook(
            "scale_out",
            self.webhooks.scale_out.as_ref(),
            json!({ "action": "scale_out" }),
        )
        .await
    }

    async fn restart(&self, target: Option<&str>) -> Result<()> {
        self.post_webhook(
            "restart",
            self.webhooks.restart.as_ref(),
            json!({ "action": "restart", "target": target }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://a:80/", "/health"), "http://a:80/health");
        assert_eq!(join_url("http://a:80", "health"), "http://a:80/health");
    }

    #[tokio::test]
    async fn test_check_dependency_follows_status() {
        let mut server = mockito::Server::new_async().await;
        let healthy = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let mut dependencies = HashMap::new();
        dependencies.insert("geo".to_string(), server.url());
        let hooks =
            HttpRemediationHooks::new(dependencies, "/health", WebhookConfig::default()).unwrap();

        hooks.check_dependency("geo").await.unwrap();
        healthy.assert_async().await;

        assert!(hooks.check_dependency("unknown").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_health_check_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let mut dependencies = HashMap::new();
        dependencies.insert("erp".to_string(), server.url());
        let hooks =
            HttpRemediationHooks::new(dependencies, "/health", WebhookConfig::default()).unwrap();

        assert!(hooks.check_dependency("erp").await.is_err());
    }

    #[tokio::test]
    async fn test_webhooks_post_and_skip_when_unset() {
        let mut server = mockito::Server::new_async().await;
        let restart = server
            .mock("POST", "/restart")
            .match_body(mockito::Matcher::PartialJson(
                json!({ "action": "restart", "target": "erp" }),
            ))
            .with_status(202)
            .create_async()
            .await;

        let webhooks = WebhookConfig {
            restart: Some(format!("{}/restart", server.url())),
            ..Default::default()
        };
        let hooks = HttpRemediationHooks::new(HashMap::new(), "/health", webhooks).unwrap();

        hooks.restart(Some("erp")).await.unwrap();
        restart.assert_async().await;

        // No scale-out webhook configured
        hooks.request_scale_out().await.unwrap();
    }
}
