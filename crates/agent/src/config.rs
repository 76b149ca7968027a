//! Agent configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use guard_lib::GuardConfig;
use serde::Deserialize;

/// Environment variable naming an optional TOML/JSON config file
pub const CONFIG_FILE_ENV: &str = "GUARD_CONFIG_FILE";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name stamped on structured log events
    pub node_name: String,

    /// Port for the HTTP API, health and metrics
    pub api_port: u16,

    /// Dependency id to base URL for guarded calls and health checks
    pub dependencies: HashMap<String, String>,

    /// Path appended to a dependency's base URL when checking its health
    pub dependency_health_path: String,

    /// Remediation webhooks
    pub webhooks: WebhookConfig,

    /// Seconds between counter store checks
    pub store_check_interval_secs: u64,

    /// Control plane settings
    pub guard: GuardConfig,
}

/// Webhook URLs called by the remediation hooks. Unset hooks are skipped.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub scale_out: Option<String>,
    pub restart: Option<String>,
    pub rotate_credentials: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            api_port: 8080,
            dependencies: HashMap::new(),
            dependency_health_path: "/health".to_string(),
            webhooks: WebhookConfig::default(),
            store_check_interval_secs: 5,
            guard: GuardConfig::default(),
        }
    }
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "local".to_string())
}

impl AgentConfig {
    /// Load from the file named by `GUARD_CONFIG_FILE` (if any) and
    /// `GUARD_`-prefixed environment variables
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Load from an explicit file plus environment overrides
    ///
    /// Nested keys use a double underscore, e.g.
    /// `GUARD_GUARD__BREAKER__FAILURE_THRESHOLD=3`.
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("GUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AgentConfig = builder
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration")?;

        config
            .guard
            .validate()
            .context("Invalid control plane configuration")?;
        Ok(config)
    }

    pub fn dependency_url(&self, dependency: &str) -> Option<&str> {
        self.dependencies.get(dependency).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_sources() {
        let config = AgentConfig::default();
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.dependency_health_path, "/health");
        assert!(config.webhooks.scale_out.is_none());
        assert!(config.guard.validate().is_ok());
    }

    #[test]
    fn test_load_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "api_port": 9191,
                "dependencies": {{"geo": "http://geo.internal:8000"}},
                "webhooks": {{"restart": "http://ops.internal/restart"}},
                "guard": {{"breaker": {{"failure_threshold": 3}}}}
            }}"#
        )
        .unwrap();

        let config = AgentConfig::load_from(Some(file.path())).unwrap();

        assert_eq!(config.api_port, 9191);
        assert_eq!(config.dependency_url("geo"), Some("http://geo.internal:8000"));
        assert_eq!(
            config.webhooks.restart.as_deref(),
            Some("http://ops.internal/restart")
        );
        assert_eq!(config.guard.breaker.failure_threshold, 3);
        // Unset sections keep their defaults
        assert_eq!(config.guard.rate_limit.limit, 100);
    }

    #[test]
    fn test_invalid_guard_config_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"guard": {{"rate_limit": {{"window_secs": 0}}}}}}"#).unwrap();

        let err = AgentConfig::load_from(Some(file.path())).unwrap_err();
        assert!(format!("{:#}", err).contains("window_secs"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(Path::new("/nonexistent/guard.toml")));
        assert!(result.is_err());
    }
}
