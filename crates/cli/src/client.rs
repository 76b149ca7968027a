//! API client for the resilience agent

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// A non-success answer from the agent
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    /// Raw response body
    pub body: String,
}

/// API client for the agent's HTTP API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .get(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }

    /// Make a POST request without a body
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .post(self.url(path)?)
            .send()
            .await
            .context("Failed to send request")?;

        parse(response).await
    }
}

async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error)
            .unwrap_or_else(|_| body.clone());
        return Err(ApiError {
            status: status.as_u16(),
            message,
            body,
        }
        .into());
    }

    response.json().await.context("Failed to parse response")
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSample {
    pub timestamp: String,
    pub cpu: f64,
    pub memory: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub request_count: u64,
    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencyHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub request_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingStats {
    pub samples: usize,
    pub capacity: usize,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub latest: Option<HealthSample>,
    pub breached: Vec<String>,
    pub ring: RingStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breaker {
    pub dependency: String,
    pub state: String,
    pub failures: u32,
    pub successes: u32,
    pub last_transition: String,
    #[serde(default)]
    pub probation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaneStatus {
    pub health: HealthReport,
    pub breakers: Vec<Breaker>,
    pub active_incidents: usize,
    pub rate_limiter_degraded: bool,
    pub recovery_attempts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub seq: u64,
    pub dependency: String,
    pub from: String,
    pub to: String,
    pub cause: String,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action: String,
    pub timestamp: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub status: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(default)]
    pub actions: Vec<ResponseAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub seq: u64,
    pub from: Option<String>,
    pub to: String,
    pub at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub incident: Incident,
    #[serde(default)]
    pub history: Vec<StatusChange>,
    #[serde(default)]
    pub attempts: Vec<RecoveryAttempt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIncidentRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub id: String,
    pub incident_id: String,
    pub procedure: String,
    pub started_at: String,
    pub completed_at: String,
    pub success: bool,
    pub automatic: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
