//! Core data models for the resilience control plane

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric names understood by the health monitor and its thresholds
pub mod metric {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
    pub const ERROR_RATE: &str = "error_rate";
    pub const RESPONSE_TIME_MS: &str = "response_time_ms";

    pub const ALL: [&str; 4] = [CPU, MEMORY, ERROR_RATE, RESPONSE_TIME_MS];

    /// True for metrics expressed as a fraction in [0, 1]
    pub fn is_fraction(name: &str) -> bool {
        matches!(name, CPU | MEMORY | ERROR_RATE)
    }
}

/// One health reading. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub memory: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub request_count: u64,
    /// Guarded-call statistics per dependency for the same window
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

/// Traffic seen by one dependency during a sampling window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub request_count: u64,
}

impl HealthSample {
    /// Look up a metric value by its threshold name
    pub fn metric(&self, name: &str) -> Option<f64> {
        match name {
            metric::CPU => Some(self.cpu),
            metric::MEMORY => Some(self.memory),
            metric::ERROR_RATE => Some(self.error_rate),
            metric::RESPONSE_TIME_MS => Some(self.avg_response_time_ms),
            _ => None,
        }
    }
}

/// Alert severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Derive a severity from how far a value overshoots its threshold
    pub fn from_overshoot(value: f64, threshold: f64) -> Self {
        if threshold <= 0.0 {
            return Severity::Critical;
        }
        let ratio = value / threshold;
        if ratio >= 1.5 {
            Severity::Critical
        } else if ratio >= 1.25 {
            Severity::High
        } else if ratio >= 1.1 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// A threshold breach observed in one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub severity: Severity,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(metric: impl Into<String>, value: f64, threshold: f64, at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            severity: Severity::from_overshoot(value, threshold),
            metric: metric.into(),
            value,
            threshold,
            timestamp: at,
        }
    }
}

/// Incident classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    ResourceExhaustion,
    DependencyFailure,
    SecurityEvent,
    Anomaly,
}

impl IncidentType {
    /// Incident type raised for a breached health metric
    pub fn for_metric(name: &str) -> Self {
        match name {
            metric::CPU | metric::MEMORY => IncidentType::ResourceExhaustion,
            _ => IncidentType::Anomaly,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::ResourceExhaustion => write!(f, "resource-exhaustion"),
            IncidentType::DependencyFailure => write!(f, "dependency-failure"),
            IncidentType::SecurityEvent => write!(f, "security-event"),
            IncidentType::Anomaly => write!(f, "anomaly"),
        }
    }
}

impl std::str::FromStr for IncidentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "resource-exhaustion" => Ok(IncidentType::ResourceExhaustion),
            "dependency-failure" => Ok(IncidentType::DependencyFailure),
            "security-event" => Ok(IncidentType::SecurityEvent),
            "anomaly" => Ok(IncidentType::Anomaly),
            other => Err(format!("unknown incident type: {}", other)),
        }
    }
}

/// Incident lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    InProgress,
    Resolved,
}

impl IncidentStatus {
    pub fn is_active(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::InProgress => write!(f, "in_progress"),
            IncidentStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// Where an incident came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncidentOrigin {
    /// Raised from a health monitor alert
    Alert { alert_id: String, metric: String },
    /// Raised when a dependency's breaker tripped
    Breaker,
    /// Opened directly by an operator or simulator
    External,
}

/// Outcome of one response step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl std::fmt::Display for ActionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionOutcome::Succeeded => write!(f, "succeeded"),
            ActionOutcome::Failed => write!(f, "failed"),
            ActionOutcome::TimedOut => write!(f, "timed_out"),
            ActionOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Entry in an incident's response timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: ActionOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A tracked problem and the actions taken in response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub title: String,
    /// Dependency the incident concerns, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub origin: IncidentOrigin,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    pub actions: Vec<ResponseAction>,
}

/// Remediation procedures the orchestrator can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryProcedure {
    /// Confirm the dependency answers, then force its breaker closed
    ResetBreaker,
    /// Ask the platform for more capacity
    ScaleOut,
    /// Rotate credentials, then re-check breakers are closed
    RotateCredentials,
    /// Restart the affected service
    Restart,
}

impl RecoveryProcedure {
    /// Procedure lookup table keyed by incident type
    pub fn for_incident(kind: IncidentType) -> Self {
        match kind {
            IncidentType::DependencyFailure => RecoveryProcedure::ResetBreaker,
            IncidentType::ResourceExhaustion => RecoveryProcedure::ScaleOut,
            IncidentType::SecurityEvent => RecoveryProcedure::RotateCredentials,
            IncidentType::Anomaly => RecoveryProcedure::Restart,
        }
    }
}

impl std::fmt::Display for RecoveryProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryProcedure::ResetBreaker => write!(f, "reset_breaker"),
            RecoveryProcedure::ScaleOut => write!(f, "scale_out"),
            RecoveryProcedure::RotateCredentials => write!(f, "rotate_credentials"),
            RecoveryProcedure::Restart => write!(f, "restart"),
        }
    }
}

/// Record of one recovery run. Immutable once completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub incident_id: String,
    pub procedure: RecoveryProcedure,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    /// False when an operator triggered the attempt
    pub automatic: bool,
    /// The procedure was cut off by its deadline
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_from_overshoot() {
        assert_eq!(Severity::from_overshoot(0.92, 0.80), Severity::Medium);
        assert_eq!(Severity::from_overshoot(0.81, 0.80), Severity::Low);
        assert_eq!(Severity::from_overshoot(0.065, 0.05), Severity::High);
        assert_eq!(Severity::from_overshoot(0.5, 0.05), Severity::Critical);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn test_incident_type_parsing() {
        assert_eq!(
            "dependency-failure".parse::<IncidentType>().unwrap(),
            IncidentType::DependencyFailure
        );
        assert_eq!(
            "security_event".parse::<IncidentType>().unwrap(),
            IncidentType::SecurityEvent
        );
        assert!("meltdown".parse::<IncidentType>().is_err());
    }

    #[test]
    fn test_metric_to_incident_type() {
        assert_eq!(
            IncidentType::for_metric(metric::CPU),
            IncidentType::ResourceExhaustion
        );
        assert_eq!(
            IncidentType::for_metric(metric::MEMORY),
            IncidentType::ResourceExhaustion
        );
        assert_eq!(
            IncidentType::for_metric(metric::ERROR_RATE),
            IncidentType::Anomaly
        );
    }

    #[test]
    fn test_incident_status_ordering() {
        assert!(IncidentStatus::Open < IncidentStatus::InProgress);
        assert!(IncidentStatus::InProgress < IncidentStatus::Resolved);
        assert!(!IncidentStatus::Resolved.is_active());
    }

    #[test]
    fn test_incident_serializes_type_field() {
        let incident = Incident {
            id: "inc-1".to_string(),
            kind: IncidentType::SecurityEvent,
            severity: Severity::High,
            status: IncidentStatus::Open,
            title: "credential stuffing".to_string(),
            target: None,
            origin: IncidentOrigin::External,
            created_at: Utc::now(),
            resolved_at: None,
            actions: Vec::new(),
        };

        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["type"], "security_event");
        assert_eq!(json["origin"]["kind"], "external");
        assert!(json.get("target").is_none());
    }
}
