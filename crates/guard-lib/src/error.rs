//! Error taxonomy for the resilience control plane
//!
//! `RateLimitExceeded` and `DependencyUnavailable` are expected control-flow
//! signals handed back to callers. `InvalidTransition` is a usage defect and
//! is never swallowed. `StoreUnavailable` is a degraded-mode condition.

use std::time::Duration;

use thiserror::Error;

use crate::models::IncidentStatus;

/// Errors produced by the control plane components.
#[derive(Debug, Clone, Error)]
pub enum GuardError {
    /// The resource's budget for the current window is spent.
    #[error("rate limit exceeded for {resource}, retry after {retry_after:?}")]
    RateLimitExceeded {
        resource: String,
        retry_after: Duration,
    },

    /// The dependency's circuit is open (or its half-open probes are taken).
    #[error("dependency unavailable: {dependency}")]
    DependencyUnavailable { dependency: String },

    /// An incident status change that would move backwards.
    #[error("invalid transition for incident {incident}: {from} -> {to}")]
    InvalidTransition {
        incident: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    /// A recovery procedure did not finish before its deadline.
    #[error("recovery for incident {incident} timed out after {timeout:?}")]
    RecoveryTimeout { incident: String, timeout: Duration },

    /// The shared counter store could not be reached.
    #[error("counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("incident not found: {0}")]
    IncidentNotFound(String),

    /// Manual recovery was requested but no incident is active.
    #[error("no unresolved incident to recover")]
    NothingToRecover,

    /// A remediation hook reported failure.
    #[error("remediation step {step} failed: {reason}")]
    RemediationFailed { step: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Writing or replaying a persisted log failed.
    #[error("journal error: {0}")]
    Journal(String),
}

impl GuardError {
    /// True for the signals callers are expected to handle by backing off or
    /// falling back.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GuardError::RateLimitExceeded { .. } | GuardError::DependencyUnavailable { .. }
        )
    }

    /// Suggested wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GuardError::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type for control plane operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// Outcome of a call made through the protected-call path.
///
/// Keeps the guard's own rejections apart from the upstream's error type.
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("dependency {dependency} unavailable")]
    Unavailable { dependency: String },

    /// The limiter is failing closed and could not reach its store.
    #[error("rate limiter store unavailable: {0}")]
    Store(String),

    #[error("upstream call failed: {0}")]
    Upstream(E),
}

impl<E> CallError<E> {
    /// Convert a rejection from the guard into a call error.
    pub fn from_guard(err: GuardError) -> Self {
        match err {
            GuardError::RateLimitExceeded { retry_after, .. } => {
                CallError::RateLimited { retry_after }
            }
            GuardError::DependencyUnavailable { dependency } => {
                CallError::Unavailable { dependency }
            }
            other => CallError::Store(other.to_string()),
        }
    }

    /// Returns the upstream error, if the call reached the dependency.
    pub fn upstream(&self) -> Option<&E> {
        match self {
            CallError::Upstream(e) => Some(e),
            _ => None,
        }
    }
}
