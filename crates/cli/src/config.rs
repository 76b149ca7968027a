//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "GUARDCTL_CONFIG";

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent API URL
    pub api_url: Option<String>,
}

impl Config {
    /// Load configuration from file; a missing file yields defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(path));
        }
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("guardctl").join("config.json"))
    }
}

/// Pick the API URL: flag or environment first, then the config file, then the default
pub fn resolve_api_url(explicit: Option<String>, config: &Config) -> String {
    explicit
        .or_else(|| config.api_url.clone())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert!(config.api_url.is_none());
    }

    #[test]
    fn test_api_url_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_url": "http://agent.internal:8080"}"#).unwrap();
        let config = Config::load_from(&path).unwrap();

        assert_eq!(
            resolve_api_url(Some("http://flag:1".to_string()), &config),
            "http://flag:1"
        );
        assert_eq!(resolve_api_url(None, &config), "http://agent.internal:8080");
        assert_eq!(resolve_api_url(None, &Config::default()), DEFAULT_API_URL);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
