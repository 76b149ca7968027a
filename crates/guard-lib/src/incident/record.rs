//! Journal records and the status-change audit entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Incident, IncidentStatus, ResponseAction};

/// One status change of one incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub seq: u64,
    pub incident_id: String,
    /// `None` when the incident was created
    pub from: Option<IncidentStatus>,
    pub to: IncidentStatus,
    pub at: DateTime<Utc>,
}

/// Everything written to the incident journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub(crate) enum IncidentRecord {
    Opened {
        incident: Incident,
    },
    Action {
        incident_id: String,
        action: ResponseAction,
    },
    Status {
        incident_id: String,
        from: IncidentStatus,
        to: IncidentStatus,
        at: DateTime<Utc>,
    },
}
