//! Request statistics gathered from the protected-call path
//!
//! The guard records every call that actually reached a dependency. The
//! health monitor drains the window after each completed read to derive error
//! rate and average response time, overall and per dependency.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::models::DependencyHealth;

/// Counts for one sampling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrafficCounts {
    pub requests: u64,
    pub errors: u64,
    pub total_latency_ms: f64,
}

impl TrafficCounts {
    fn add(&mut self, success: bool, latency: Duration) {
        self.requests += 1;
        if !success {
            self.errors += 1;
        }
        self.total_latency_ms += latency.as_secs_f64() * 1000.0;
    }

    /// Errors over requests; zero without traffic
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms / self.requests as f64
        }
    }
}

impl From<TrafficCounts> for DependencyHealth {
    fn from(counts: TrafficCounts) -> Self {
        DependencyHealth {
            error_rate: counts.error_rate(),
            avg_response_time_ms: counts.avg_latency_ms(),
            request_count: counts.requests,
        }
    }
}

/// One drained window
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrafficWindow {
    pub overall: TrafficCounts,
    pub per_dependency: HashMap<String, TrafficCounts>,
}

#[derive(Default)]
struct Window {
    overall: TrafficCounts,
    per_dependency: HashMap<String, TrafficCounts>,
}

/// Shared recorder; clones feed the same window
#[derive(Clone, Default)]
pub struct TrafficRecorder {
    window: Arc<Mutex<Window>>,
}

impl TrafficRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, dependency: &str, success: bool, latency: Duration) {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        window.overall.add(success, latency);
        window
            .per_dependency
            .entry(dependency.to_string())
            .or_default()
            .add(success, latency);
    }

    /// Take the current window and start a fresh one
    pub fn drain(&self) -> TrafficWindow {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        let taken = std::mem::take(&mut *window);
        TrafficWindow {
            overall: taken.overall,
            per_dependency: taken.per_dependency,
        }
    }

    /// Current window without resetting it
    pub fn peek(&self) -> TrafficWindow {
        let window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        TrafficWindow {
            overall: window.overall,
            per_dependency: window.per_dependency.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_resets_window() {
        let recorder = TrafficRecorder::new();
        recorder.record("erp", true, Duration::from_millis(100));
        recorder.record("erp", false, Duration::from_millis(300));
        recorder.record("geo", true, Duration::from_millis(20));

        let window = recorder.drain();
        assert_eq!(window.overall.requests, 3);
        assert_eq!(window.overall.errors, 1);
        assert_eq!(window.per_dependency["erp"].requests, 2);
        assert!((window.per_dependency["erp"].avg_latency_ms() - 200.0).abs() < 1e-6);
        assert!((window.per_dependency["erp"].error_rate() - 0.5).abs() < 1e-9);

        let empty = recorder.drain();
        assert_eq!(empty.overall.requests, 0);
        assert_eq!(empty.overall.error_rate(), 0.0);
        assert_eq!(empty.overall.avg_latency_ms(), 0.0);
    }

    #[test]
    fn test_clones_share_window() {
        let recorder = TrafficRecorder::new();
        let other = recorder.clone();
        other.record("erp", true, Duration::from_millis(5));

        assert_eq!(recorder.peek().overall.requests, 1);
        assert_eq!(recorder.peek().overall.requests, 1);
    }
}
