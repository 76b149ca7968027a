//! Breaker state record and transition vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// A limited number of probe calls are let through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Why a transition happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionCause {
    /// Consecutive failures reached the threshold
    FailureThreshold,
    /// The open period elapsed and a call arrived
    ResetTimeout,
    /// A half-open probe failed
    ProbeFailed,
    /// Enough half-open probes succeeded
    ProbeSucceeded,
    /// First failure after a manual reset
    FailureAfterReset,
    /// Operator or orchestrator forced the breaker closed
    Manual,
}

impl std::fmt::Display for TransitionCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionCause::FailureThreshold => write!(f, "failure_threshold"),
            TransitionCause::ResetTimeout => write!(f, "reset_timeout"),
            TransitionCause::ProbeFailed => write!(f, "probe_failed"),
            TransitionCause::ProbeSucceeded => write!(f, "probe_succeeded"),
            TransitionCause::FailureAfterReset => write!(f, "failure_after_reset"),
            TransitionCause::Manual => write!(f, "manual"),
        }
    }
}

/// One entry of the transition audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Position in the registry-wide log
    pub seq: u64,
    pub dependency: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub cause: TransitionCause,
    pub at: DateTime<Utc>,
}

/// Mutable per-dependency record, only touched under its entry lock
#[derive(Debug, Clone)]
pub(crate) struct BreakerState {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    /// Half-open probes admitted but not yet reported
    pub probes_in_flight: u32,
    pub last_transition: DateTime<Utc>,
    /// Bumped on every transition; results from older epochs are ignored
    pub epoch: u64,
    /// Set by a manual reset until the next observed outcome
    pub probation: bool,
}

impl BreakerState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            probes_in_flight: 0,
            last_transition: now,
            epoch: 0,
            probation: false,
        }
    }

    /// Move to `to`, resetting counters. Returns the previous state.
    pub fn enter(&mut self, to: CircuitState, now: DateTime<Utc>) -> CircuitState {
        let from = self.state;
        self.state = to;
        self.failures = 0;
        self.successes = 0;
        self.probes_in_flight = 0;
        self.last_transition = now;
        self.epoch += 1;
        self.probation = false;
        from
    }
}

/// Read-only view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_transition: DateTime<Utc>,
    pub probation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_resets_counters() {
        let now = Utc::now();
        let mut state = BreakerState::new(now);
        state.failures = 4;
        state.successes = 1;
        state.probes_in_flight = 2;
        state.probation = true;

        let from = state.enter(CircuitState::Open, now);

        assert_eq!(from, CircuitState::Closed);
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.failures, 0);
        assert_eq!(state.successes, 0);
        assert_eq!(state.probes_in_flight, 0);
        assert!(!state.probation);
        assert_eq!(state.epoch, 1);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
        assert_eq!(TransitionCause::Manual.to_string(), "manual");
    }
}
