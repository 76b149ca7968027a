//! Observability infrastructure for the control plane
//!
//! Provides:
//! - Prometheus metrics (breaker transitions, limiter denials, sampling, incidents, recovery)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::breaker::Transition;
use crate::models::{Alert, Incident, RecoveryAttempt};

/// Histogram buckets for sampling latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GuardMetricsInner> = OnceLock::new();

struct GuardMetricsInner {
    breaker_transitions: IntCounterVec,
    breaker_rejections: IntCounterVec,
    rate_limit_denials: IntCounterVec,
    store_degraded: IntCounter,
    samples: IntCounterVec,
    sampling_latency_seconds: Histogram,
    alerts: IntCounterVec,
    alerts_suppressed: IntCounter,
    incidents_opened: IntCounterVec,
    incidents_active: IntGauge,
    recovery_attempts: IntCounterVec,
    health_status: IntGauge,
}

impl GuardMetricsInner {
    fn new() -> Self {
        Self {
            breaker_transitions: register_int_counter_vec!(
                "guard_breaker_transitions_total",
                "Circuit breaker state transitions",
                &["dependency", "to_state"]
            )
            .expect("Failed to register breaker_transitions"),

            breaker_rejections: register_int_counter_vec!(
                "guard_breaker_rejections_total",
                "Calls rejected without reaching the dependency",
                &["dependency"]
            )
            .expect("Failed to register breaker_rejections"),

            rate_limit_denials: register_int_counter_vec!(
                "guard_rate_limit_denials_total",
                "Requests denied by the rate limiter",
                &["resource"]
            )
            .expect("Failed to register rate_limit_denials"),

            store_degraded: register_int_counter!(
                "guard_store_degraded_total",
                "Rate limit checks made while the counter store was unreachable"
            )
            .expect("Failed to register store_degraded"),

            samples: register_int_counter_vec!(
                "guard_health_samples_total",
                "Health sampling ticks by outcome",
                &["outcome"]
            )
            .expect("Failed to register samples"),

            sampling_latency_seconds: register_histogram!(
                "guard_sampling_latency_seconds",
                "Time spent reading one health sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            alerts: register_int_counter_vec!(
                "guard_alerts_total",
                "Alerts raised by the health monitor",
                &["metric", "severity"]
            )
            .expect("Failed to register alerts"),

            alerts_suppressed: register_int_counter!(
                "guard_alerts_suppressed_total",
                "Alerts folded into an already open incident"
            )
            .expect("Failed to register alerts_suppressed"),

            incidents_opened: register_int_counter_vec!(
                "guard_incidents_opened_total",
                "Incidents opened by type",
                &["type"]
            )
            .expect("Failed to register incidents_opened"),

            incidents_active: register_int_gauge!(
                "guard_incidents_active",
                "Incidents not yet resolved"
            )
            .expect("Failed to register incidents_active"),

            recovery_attempts: register_int_counter_vec!(
                "guard_recovery_attempts_total",
                "Recovery attempts by procedure and outcome",
                &["procedure", "outcome"]
            )
            .expect("Failed to register recovery_attempts"),

            health_status: register_int_gauge!(
                "guard_health_status",
                "Derived health status (0 healthy, 1 degraded, 2 critical)"
            )
            .expect("Failed to register health_status"),
        }
    }
}

/// Control plane metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct GuardMetrics {
    _private: (),
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardMetrics {
    /// Create a metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GuardMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GuardMetricsInner {
        GLOBAL_METRICS.get_or_init(GuardMetricsInner::new)
    }

    pub fn record_transition(&self, dependency: &str, to_state: &str) {
        self.inner()
            .breaker_transitions
            .with_label_values(&[dependency, to_state])
            .inc();
    }

    pub fn inc_breaker_rejections(&self, dependency: &str) {
        self.inner()
            .breaker_rejections
            .with_label_values(&[dependency])
            .inc();
    }

    pub fn inc_rate_limit_denials(&self, resource: &str) {
        self.inner()
            .rate_limit_denials
            .with_label_values(&[resource])
            .inc();
    }

    pub fn inc_store_degraded(&self) {
        self.inner().store_degraded.inc();
    }

    pub fn record_sample(&self, complete: bool, latency_secs: f64) {
        let outcome = if complete { "complete" } else { "incomplete" };
        self.inner().samples.with_label_values(&[outcome]).inc();
        self.inner().sampling_latency_seconds.observe(latency_secs);
    }

    pub fn inc_alerts(&self, metric: &str, severity: &str) {
        self.inner()
            .alerts
            .with_label_values(&[metric, severity])
            .inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner().alerts_suppressed.inc();
    }

    pub fn inc_incidents_opened(&self, kind: &str) {
        self.inner()
            .incidents_opened
            .with_label_values(&[kind])
            .inc();
    }

    pub fn set_incidents_active(&self, count: i64) {
        self.inner().incidents_active.set(count);
    }

    pub fn record_recovery(&self, procedure: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.inner()
            .recovery_attempts
            .with_label_values(&[procedure, outcome])
            .inc();
    }

    pub fn set_health_status(&self, level: i64) {
        self.inner().health_status.set(level);
    }
}

/// Structured logger for control plane events
///
/// One line per significant event with a stable `event` field, so the
/// transition log can be reconstructed from logs alone.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a breaker state transition
    pub fn log_transition(&self, transition: &Transition) {
        if transition.to == crate::breaker::CircuitState::Open {
            warn!(
                event = "breaker_transition",
                node = %self.node_name,
                dependency = %transition.dependency,
                old_state = %transition.from,
                new_state = %transition.to,
                cause = %transition.cause,
                at = %transition.at.to_rfc3339(),
                "Circuit breaker opened"
            );
        } else {
            info!(
                event = "breaker_transition",
                node = %self.node_name,
                dependency = %transition.dependency,
                old_state = %transition.from,
                new_state = %transition.to,
                cause = %transition.cause,
                at = %transition.at.to_rfc3339(),
                "Circuit breaker transitioned"
            );
        }
    }

    /// Log a limiter check made without its store
    pub fn log_store_degraded(&self, resource: &str, error: &str, fail_open: bool) {
        warn!(
            event = "store_degraded",
            node = %self.node_name,
            resource = %resource,
            error = %error,
            fail_open = fail_open,
            "Counter store unreachable, rate limiter in degraded mode"
        );
    }

    /// Log a raised alert
    pub fn log_alert(&self, alert: &Alert) {
        warn!(
            event = "alert_raised",
            node = %self.node_name,
            alert_id = %alert.id,
            metric = %alert.metric,
            value = alert.value,
            threshold = alert.threshold,
            severity = %alert.severity,
            "Health threshold breached"
        );
    }

    /// Log an opened incident
    pub fn log_incident_opened(&self, incident: &Incident) {
        warn!(
            event = "incident_opened",
            node = %self.node_name,
            incident_id = %incident.id,
            incident_type = %incident.kind,
            severity = %incident.severity,
            target = ?incident.target,
            title = %incident.title,
            "Incident opened"
        );
    }

    /// Log a resolved incident
    pub fn log_incident_resolved(&self, incident: &Incident) {
        info!(
            event = "incident_resolved",
            node = %self.node_name,
            incident_id = %incident.id,
            incident_type = %incident.kind,
            actions = incident.actions.len(),
            "Incident resolved"
        );
    }

    /// Log a finished recovery attempt
    pub fn log_recovery(&self, attempt: &RecoveryAttempt) {
        let duration_ms = (attempt.completed_at - attempt.started_at)
            .num_milliseconds()
            .max(0);
        if attempt.success {
            info!(
                event = "recovery_completed",
                node = %self.node_name,
                incident_id = %attempt.incident_id,
                procedure = %attempt.procedure,
                automatic = attempt.automatic,
                duration_ms = duration_ms,
                "Recovery procedure succeeded"
            );
        } else {
            warn!(
                event = "recovery_failed",
                node = %self.node_name,
                incident_id = %attempt.incident_id,
                procedure = %attempt.procedure,
                automatic = attempt.automatic,
                duration_ms = duration_ms,
                error = ?attempt.error,
                "Recovery procedure failed"
            );
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            "Resilience agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Resilience agent shutting down"
        );
    }
}
