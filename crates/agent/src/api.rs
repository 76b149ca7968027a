//! HTTP API for the dashboard, simulators, health checks and Prometheus metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use guard_lib::{
    health::ComponentStatus, ActionOutcome, BreakerSnapshot, BroadcastSink, CallError,
    GuardError, Guard, HealthMonitor, HealthRegistry, HealthReport, Incident, IncidentManager,
    IncidentType, RecoveryAttempt, RecoveryOrchestrator, Severity, StatusChange, Transition,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::hooks::join_url;

const DEFAULT_SAMPLE_LIMIT: usize = 60;

/// Shared application state
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub monitor: HealthMonitor,
    pub guard: Guard,
    pub incidents: IncidentManager,
    pub recovery: RecoveryOrchestrator,
    pub events: BroadcastSink,
    pub client: reqwest::Client,
    /// Dependency id to base URL
    pub dependencies: Arc<HashMap<String, String>>,
}

/// Error body and status code for API failures
#[derive(Debug)]
pub enum ApiError {
    Guard(GuardError),
    BadRequest(String),
    NotFound(String),
    /// The dependency was reached and failed
    BadGateway(String),
    Internal(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        ApiError::Guard(err)
    }
}

impl ApiError {
    fn from_call(resource: &str, err: CallError<reqwest::Error>) -> Self {
        match err {
            CallError::RateLimited { retry_after } => ApiError::Guard(GuardError::RateLimitExceeded {
                resource: resource.to_string(),
                retry_after,
            }),
            CallError::Unavailable { dependency } => {
                ApiError::Guard(GuardError::DependencyUnavailable { dependency })
            }
            CallError::Store(reason) => ApiError::Guard(GuardError::StoreUnavailable(reason)),
            CallError::Upstream(e) => ApiError::BadGateway(e.to_string()),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Guard(err) => match err {
                GuardError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                GuardError::DependencyUnavailable { .. } | GuardError::StoreUnavailable(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                GuardError::InvalidTransition { .. } | GuardError::RemediationFailed { .. } => {
                    StatusCode::CONFLICT
                }
                GuardError::IncidentNotFound(_) | GuardError::NothingToRecover => {
                    StatusCode::NOT_FOUND
                }
                GuardError::RecoveryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                GuardError::Config(_) | GuardError::Journal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Guard(err) => write!(f, "{}", err),
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::BadGateway(msg)
            | ApiError::Internal(msg) => write!(f, "{}", msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let retry_after = match &self {
            ApiError::Guard(err) => err.retry_after(),
            _ => None,
        };
        let mut response = (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(wait) = retry_after {
            // Whole seconds, rounded up, never zero
            let secs = (wait.as_secs() + u64::from(wait.subsec_nanos() > 0)).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> ApiResult<impl IntoResponse> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ApiError::Internal(format!("failed to encode metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        buffer,
    ))
}

/// Dashboard overview
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub health: HealthReport,
    pub breakers: Vec<BreakerSnapshot>,
    pub active_incidents: usize,
    pub rate_limiter_degraded: bool,
    pub recovery_attempts: usize,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        health: state.monitor.status().await,
        breakers: state.guard.breakers().snapshot(),
        active_incidents: state.incidents.active().len(),
        rate_limiter_degraded: state.guard.limiter().is_degraded(),
        recovery_attempts: state.recovery.attempts().len(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    pub limit: Option<usize>,
}

async fn samples(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_SAMPLE_LIMIT);
    Json(state.monitor.recent(limit).await)
}

/// Server-sent events of everything published to the sink
async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(
        subscribers = state.events.subscriber_count() + 1,
        "Dashboard stream opened"
    );
    let events = BroadcastStream::new(state.events.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(event) => Some(Event::default().event(event.name()).json_data(&event)),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                debug!(skipped, "Dashboard stream lagged");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn list_breakers(State(state): State<Arc<AppState>>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.guard.breakers().snapshot())
}

async fn reset_breaker(
    State(state): State<Arc<AppState>>,
    Path(dependency): Path<String>,
) -> ApiResult<Json<Transition>> {
    let breakers = state.guard.breakers();
    let known = state.dependencies.contains_key(&dependency)
        || breakers.dependencies().contains(&dependency);
    if !known {
        return Err(ApiError::NotFound(format!("unknown dependency: {}", dependency)));
    }
    info!(dependency = %dependency, "Manual breaker reset requested");
    Ok(Json(breakers.force_reset(&dependency)))
}

#[derive(Debug, Deserialize)]
pub struct TransitionsQuery {
    pub dependency: Option<String>,
}

async fn transitions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransitionsQuery>,
) -> impl IntoResponse {
    let breakers = state.guard.breakers();
    Json(match query.dependency {
        Some(dependency) => breakers.transitions_for(&dependency),
        None => breakers.transitions(),
    })
}

async fn rate_limit_usage(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.guard.limiter().usage(&resource).await?))
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    /// Only unresolved incidents
    #[serde(default)]
    pub active: bool,
}

async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<IncidentsQuery>,
) -> Json<Vec<Incident>> {
    Json(if query.active {
        state.incidents.active()
    } else {
        state.incidents.list()
    })
}

/// Body of `POST /api/v1/incidents`
#[derive(Debug, Serialize, Deserialize)]
pub struct OpenIncidentRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

async fn open_incident(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OpenIncidentRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind: IncidentType = request.kind.parse().map_err(ApiError::BadRequest)?;
    let severity: Severity = request.severity.parse().map_err(ApiError::BadRequest)?;

    let incident = state
        .incidents
        .open_external(kind, severity, request.title, request.target)?;
    Ok((StatusCode::CREATED, Json(incident)))
}

/// An incident with its status history and recovery attempts
#[derive(Debug, Serialize)]
pub struct IncidentDetail {
    #[serde(flatten)]
    pub incident: Incident,
    pub history: Vec<StatusChange>,
    pub attempts: Vec<RecoveryAttempt>,
}

async fn get_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<IncidentDetail>> {
    let incident = state
        .incidents
        .get(&id)
        .ok_or_else(|| GuardError::IncidentNotFound(id.clone()))?;

    Ok(Json(IncidentDetail {
        history: state.incidents.history_for(&id),
        attempts: state.recovery.attempts_for(&id),
        incident,
    }))
}

/// Body of `POST /api/v1/incidents/{id}/actions`
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub outcome: Option<ActionOutcome>,
    #[serde(default)]
    pub detail: Option<String>,
}

async fn record_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ActionRequest>,
) -> ApiResult<Json<Incident>> {
    if request.action.trim().is_empty() {
        return Err(ApiError::BadRequest("action must not be empty".to_string()));
    }

    let incident = state.incidents.record_action_with_detail(
        &id,
        request.action,
        request.outcome.unwrap_or(ActionOutcome::Succeeded),
        request.detail,
    )?;
    Ok(Json(incident))
}

async fn resolve_incident(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Incident>> {
    Ok(Json(state.incidents.resolve(&id)?))
}

/// Body of `POST /api/v1/recovery`; an empty body targets the oldest incident
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RecoverRequest {
    #[serde(default)]
    pub incident_id: Option<String>,
}

async fn trigger_recovery(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RecoverRequest>>,
) -> ApiResult<Response> {
    let incident_id = body.and_then(|Json(request)| request.incident_id);
    info!(incident_id = ?incident_id, "Manual recovery requested");

    let attempt = state
        .recovery
        .spawn_manual(incident_id)
        .await
        .map_err(|e| ApiError::Internal(format!("recovery task failed: {}", e)))??;

    let status = if attempt.timed_out {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(attempt)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    pub incident: Option<String>,
}

async fn list_attempts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AttemptsQuery>,
) -> Json<Vec<RecoveryAttempt>> {
    Json(match query.incident {
        Some(id) => state.recovery.attempts_for(&id),
        None => state.recovery.attempts(),
    })
}

/// Body of `POST /api/v1/dependencies/{id}/call`
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CallRequest {
    /// Path appended to the dependency's base URL
    #[serde(default)]
    pub path: Option<String>,
}

/// Result of a guarded dependency call
#[derive(Debug, Serialize, Deserialize)]
pub struct CallResponse {
    pub dependency: String,
    pub status: u16,
    pub latency_ms: u64,
}

async fn call_dependency(
    State(state): State<Arc<AppState>>,
    Path(dependency): Path<String>,
    body: Option<Json<CallRequest>>,
) -> ApiResult<Json<CallResponse>> {
    let base = state
        .dependencies
        .get(&dependency)
        .ok_or_else(|| ApiError::NotFound(format!("unknown dependency: {}", dependency)))?;
    let url = match body.and_then(|Json(request)| request.path) {
        Some(path) => join_url(base, &path),
        None => base.clone(),
    };
    // Budgets are kept per upstream host
    let resource = reqwest::Url::parse(&url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| dependency.clone());

    let started = Instant::now();
    let client = state.client.clone();
    let response = state
        .guard
        .call(&dependency, &resource, async move {
            client.get(&url).send().await?.error_for_status()
        })
        .await
        .map_err(|e| ApiError::from_call(&resource, e))?;

    Ok(Json(CallResponse {
        dependency,
        status: response.status().as_u16(),
        latency_ms: started.elapsed().as_millis() as u64,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .route("/samples", get(samples))
        .route("/stream", get(stream))
        .route("/breakers", get(list_breakers))
        .route("/breakers/:id/reset", post(reset_breaker))
        .route("/transitions", get(transitions))
        .route("/ratelimit/:resource", get(rate_limit_usage))
        .route("/incidents", get(list_incidents).post(open_incident))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id/actions", post(record_action))
        .route("/incidents/:id/resolve", post(resolve_incident))
        .route("/recovery", post(trigger_recovery))
        .route("/recovery/attempts", get(list_attempts))
        .route("/dependencies/:id/call", post(call_dependency));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api)
        .with_state(state)
}

/// Start the API server, stopping on the shutdown signal
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
