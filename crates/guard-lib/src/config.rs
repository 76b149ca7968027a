//! Typed configuration for the control plane
//!
//! Enumerated once at startup. Every field has a default so partial files and
//! environment overrides deserialize cleanly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, GuardResult};
use crate::models::metric;

/// Top-level control plane configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub monitor: MonitorConfig,
    pub incidents: IncidentConfig,
    pub recovery: RecoveryConfig,
}

/// Circuit breaker settings shared by every dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that trip a closed breaker
    pub failure_threshold: u32,
    /// Seconds an open breaker waits before admitting probes
    pub reset_timeout_secs: u64,
    /// Successful probes needed to close a half-open breaker
    pub half_open_trial_count: u32,
    /// After a manual reset, reopen on the first observed failure
    pub reopen_on_first_failure_after_reset: bool,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            half_open_trial_count: 3,
            reopen_on_first_failure_after_reset: true,
        }
    }
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Rate limiter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per resource per window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
    /// Allow requests when the counter store is unreachable
    pub fail_open: bool,
    /// Per-resource limits replacing `limit`
    pub overrides: HashMap<String, u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window_secs: 60,
            fail_open: true,
            overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn limit_for(&self, resource: &str) -> u64 {
        self.overrides.get(resource).copied().unwrap_or(self.limit)
    }
}

/// Health monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between samples
    pub interval_secs: u64,
    /// Milliseconds a single metrics read may take
    pub sample_timeout_ms: u64,
    /// Samples retained in the ring buffer
    pub ring_capacity: usize,
    /// Metric name to breach value
    pub thresholds: HashMap<String, f64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(metric::CPU.to_string(), 0.80);
        thresholds.insert(metric::MEMORY.to_string(), 0.85);
        thresholds.insert(metric::ERROR_RATE.to_string(), 0.05);

        Self {
            interval_secs: 10,
            sample_timeout_ms: 2_000,
            ring_capacity: 360,
            thresholds,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }
}

/// Incident manager settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IncidentConfig {
    /// Append-only incident journal; in-memory only when unset
    pub journal_path: Option<PathBuf>,
    /// Seconds during which repeat alerts fold into the open incident
    pub dedup_window_secs: u64,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            journal_path: None,
            dedup_window_secs: 15 * 60,
        }
    }
}

impl IncidentConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

/// Auto-recovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Seconds a single recovery attempt may run
    pub timeout_secs: u64,
    /// Append-only attempt journal; in-memory only when unset
    pub journal_path: Option<PathBuf>,
    /// Probe the dependency before force-resetting its breaker
    pub health_check_before_reset: bool,
    /// Run one automatic attempt per incident
    pub auto_recover: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            journal_path: None,
            health_check_before_reset: true,
            auto_recover: true,
        }
    }
}

impl RecoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl GuardConfig {
    /// Reject values the components cannot operate with
    pub fn validate(&self) -> GuardResult<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(GuardError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.half_open_trial_count == 0 {
            return Err(GuardError::Config(
                "breaker.half_open_trial_count must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(GuardError::Config(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.limit == 0 || self.rate_limit.overrides.values().any(|l| *l == 0) {
            return Err(GuardError::Config(
                "rate limits must be at least 1".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0 {
            return Err(GuardError::Config(
                "monitor.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.monitor.ring_capacity == 0 {
            return Err(GuardError::Config(
                "monitor.ring_capacity must be at least 1".to_string(),
            ));
        }
        for (name, value) in &self.monitor.thresholds {
            if !metric::ALL.contains(&name.as_str()) {
                return Err(GuardError::Config(format!(
                    "unknown threshold metric: {}",
                    name
                )));
            }
            let in_domain = if metric::is_fraction(name) {
                *value > 0.0 && *value <= 1.0
            } else {
                *value > 0.0
            };
            if !in_domain {
                return Err(GuardError::Config(format!(
                    "threshold for {} out of range: {}",
                    name, value
                )));
            }
        }
        if self.recovery.timeout_secs == 0 {
            return Err(GuardError::Config(
                "recovery.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
