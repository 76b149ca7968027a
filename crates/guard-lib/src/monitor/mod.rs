//! Health monitoring
//!
//! Samples host and traffic metrics on a fixed interval, keeps a bounded
//! history, raises one alert per breached metric per tick, and derives the
//! overall status from the latest sample.

mod r#loop;
mod proc;
mod ring;
mod traffic;

#[cfg(test)]
mod tests;

pub use proc::{CpuTimes, ProcMetricsSource};
pub use r#loop::{HealthMonitor, HealthMonitorBuilder, TickOutcome};
pub use ring::{RingStats, SampleRing};
pub use traffic::{TrafficCounts, TrafficRecorder, TrafficWindow};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::HealthSample;

/// The four numeric fields of a sample plus the request count
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReading {
    pub cpu: f64,
    pub memory: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub request_count: u64,
}

/// Supplies readings on demand. Reads are synchronous and may block.
pub trait MetricsSource: Send + Sync {
    fn read(&self) -> Result<MetricsReading>;
}

/// Source returning whatever was last set; used by simulators and tests
#[derive(Default)]
pub struct StaticMetricsSource {
    reading: Mutex<MetricsReading>,
    failure: Mutex<Option<String>>,
    delay: Mutex<Option<Duration>>,
}

impl StaticMetricsSource {
    pub fn new(reading: MetricsReading) -> Self {
        Self {
            reading: Mutex::new(reading),
            ..Default::default()
        }
    }

    pub fn set(&self, reading: MetricsReading) {
        *self.reading.lock().unwrap_or_else(|p| p.into_inner()) = reading;
    }

    /// Make subsequent reads fail with `message`; `None` restores them
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failure.lock().unwrap_or_else(|p| p.into_inner()) = message.map(str::to_string);
    }

    /// Block every read for `delay`
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }
}

impl MetricsSource for StaticMetricsSource {
    fn read(&self) -> Result<MetricsReading> {
        let delay = *self.delay.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if let Some(message) = self.failure.lock().unwrap_or_else(|p| p.into_inner()).clone() {
            anyhow::bail!(message);
        }
        Ok(*self.reading.lock().unwrap_or_else(|p| p.into_inner()))
    }
}

/// Overall verdict derived from the latest sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No metric over its threshold
    Healthy,
    /// Exactly one metric over its threshold
    Degraded,
    /// Two or more metrics over their thresholds
    Critical,
}

impl HealthStatus {
    /// Gauge value exported to Prometheus
    pub fn level(&self) -> i64 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Critical => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub latest: Option<HealthSample>,
    /// Metrics over threshold in the latest sample, sorted by name
    pub breached: Vec<String>,
    pub ring: RingStats,
}

/// Metrics of `sample` strictly above their thresholds, sorted by name
pub fn breached_metrics(sample: &HealthSample, thresholds: &HashMap<String, f64>) -> Vec<String> {
    let mut breached: Vec<String> = thresholds
        .iter()
        .filter(|(name, threshold)| {
            sample
                .metric(name)
                .map(|value| value > **threshold)
                .unwrap_or(false)
        })
        .map(|(name, _)| name.clone())
        .collect();
    breached.sort();
    breached
}

/// Status for a given number of breached metrics
pub fn derive_status(breached: usize) -> HealthStatus {
    match breached {
        0 => HealthStatus::Healthy,
        1 => HealthStatus::Degraded,
        _ => HealthStatus::Critical,
    }
}
