//! Incident lifecycle and intake
//!
//! Status only moves forward: OPEN -> IN_PROGRESS -> RESOLVED. Every
//! mutation is written to the journal before it is applied in memory, and all
//! of it happens under one lock so the status history stays totally ordered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::record::{IncidentRecord, StatusChange};
use crate::breaker::{CircuitState, Transition, TransitionCause};
use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::config::IncidentConfig;
use crate::error::{GuardError, GuardResult};
use crate::events::{EventSink, NullSink, PlaneEvent};
use crate::journal::Journal;
use crate::models::{
    ActionOutcome, Alert, Incident, IncidentOrigin, IncidentStatus, IncidentType,
    ResponseAction, Severity,
};
use crate::observability::{GuardMetrics, StructuredLogger};

#[derive(Default)]
struct Book {
    incidents: HashMap<String, Incident>,
    order: Vec<String>,
    history: Vec<StatusChange>,
    journal: Option<Journal<IncidentRecord>>,
}

impl Book {
    fn apply(&mut self, record: IncidentRecord) {
        match record {
            IncidentRecord::Opened { incident } => {
                self.history.push(StatusChange {
                    seq: self.history.len() as u64,
                    incident_id: incident.id.clone(),
                    from: None,
                    to: incident.status,
                    at: incident.created_at,
                });
                self.order.push(incident.id.clone());
                self.incidents.insert(incident.id.clone(), incident);
            }
            IncidentRecord::Action {
                incident_id,
                action,
            } => {
                if let Some(incident) = self.incidents.get_mut(&incident_id) {
                    incident.actions.push(action);
                }
            }
            IncidentRecord::Status {
                incident_id,
                from,
                to,
                at,
            } => {
                if let Some(incident) = self.incidents.get_mut(&incident_id) {
                    incident.status = to;
                    if to == IncidentStatus::Resolved {
                        incident.resolved_at = Some(at);
                    }
                    self.history.push(StatusChange {
                        seq: self.history.len() as u64,
                        incident_id,
                        from: Some(from),
                        to,
                        at,
                    });
                }
            }
        }
    }

    /// Persist, then apply
    fn commit(&mut self, record: IncidentRecord) -> GuardResult<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.append(&record)?;
        }
        self.apply(record);
        Ok(())
    }

    fn get(&self, id: &str) -> GuardResult<&Incident> {
        self.incidents
            .get(id)
            .ok_or_else(|| GuardError::IncidentNotFound(id.to_string()))
    }

    fn active_count(&self) -> usize {
        self.incidents.values().filter(|i| i.status.is_active()).count()
    }

    fn ordered(&self) -> impl Iterator<Item = &Incident> + '_ {
        self.order.iter().filter_map(move |id| self.incidents.get(id))
    }
}

struct Draft {
    kind: IncidentType,
    severity: Severity,
    title: String,
    target: Option<String>,
    origin: IncidentOrigin,
}

struct Inner {
    config: IncidentConfig,
    book: Mutex<Book>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    notify: Option<mpsc::Sender<Incident>>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

/// Tracks incidents and their response timelines
#[derive(Clone)]
pub struct IncidentManager {
    inner: Arc<Inner>,
}

impl IncidentManager {
    pub fn builder(config: IncidentConfig) -> IncidentManagerBuilder {
        IncidentManagerBuilder {
            config,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            notify: None,
            logger: StructuredLogger::new("local"),
        }
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.inner.book.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Open an incident, optionally from the alert that caused it
    pub fn open_incident(
        &self,
        kind: IncidentType,
        severity: Severity,
        source_alert: Option<&Alert>,
    ) -> GuardResult<Incident> {
        let draft = match source_alert {
            Some(alert) => Draft {
                kind,
                severity,
                title: format!(
                    "{} at {:.3} over threshold {:.3}",
                    alert.metric, alert.value, alert.threshold
                ),
                target: None,
                origin: IncidentOrigin::Alert {
                    alert_id: alert.id.clone(),
                    metric: alert.metric.clone(),
                },
            },
            None => Draft {
                kind,
                severity,
                title: format!("{} incident", kind),
                target: None,
                origin: IncidentOrigin::External,
            },
        };
        self.open(draft)
    }

    /// Open an incident reported by an outside caller such as an attack simulator
    pub fn open_external(
        &self,
        kind: IncidentType,
        severity: Severity,
        title: Option<String>,
        target: Option<String>,
    ) -> GuardResult<Incident> {
        self.open(Draft {
            kind,
            severity,
            title: title.unwrap_or_else(|| format!("{} incident", kind)),
            target,
            origin: IncidentOrigin::External,
        })
    }

    fn open(&self, draft: Draft) -> GuardResult<Incident> {
        let incident = Incident {
            id: uuid::Uuid::new_v4().to_string(),
            kind: draft.kind,
            severity: draft.severity,
            status: IncidentStatus::Open,
            title: draft.title,
            target: draft.target,
            origin: draft.origin,
            created_at: self.inner.clock.now(),
            resolved_at: None,
            actions: Vec::new(),
        };

        {
            let mut book = self.book();
            book.commit(IncidentRecord::Opened {
                incident: incident.clone(),
            })?;
            self.inner
                .metrics
                .set_incidents_active(book.active_count() as i64);
        }

        self.inner
            .metrics
            .inc_incidents_opened(&incident.kind.to_string());
        self.inner.logger.log_incident_opened(&incident);
        self.inner.sink.publish(PlaneEvent::Incident(incident.clone()));
        if let Some(notify) = &self.inner.notify {
            hand_on(notify, incident.clone());
        }
        Ok(incident)
    }

    /// Append a step to the response timeline
    pub fn record_response_action(
        &self,
        id: &str,
        action: impl Into<String>,
        outcome: ActionOutcome,
    ) -> GuardResult<Incident> {
        self.record_action_with_detail(id, action, outcome, None)
    }

    /// Same as [`record_response_action`](Self::record_response_action) with free-form detail
    pub fn record_action_with_detail(
        &self,
        id: &str,
        action: impl Into<String>,
        outcome: ActionOutcome,
        detail: Option<String>,
    ) -> GuardResult<Incident> {
        self.append_action(
            id,
            ResponseAction {
                action: action.into(),
                timestamp: self.inner.clock.now(),
                outcome,
                detail,
            },
        )
    }

    /// Append a fully built action. The first action moves OPEN to IN_PROGRESS.
    pub fn append_action(&self, id: &str, action: ResponseAction) -> GuardResult<Incident> {
        let incident = {
            let mut book = self.book();
            let status = book.get(id)?.status;
            match status {
                IncidentStatus::Resolved => {
                    return Err(GuardError::InvalidTransition {
                        incident: id.to_string(),
                        from: status,
                        to: IncidentStatus::InProgress,
                    });
                }
                IncidentStatus::Open => {
                    book.commit(self.status_record(id, status, IncidentStatus::InProgress))?;
                }
                IncidentStatus::InProgress => {}
            }
            book.commit(IncidentRecord::Action {
                incident_id: id.to_string(),
                action,
            })?;
            book.get(id)?.clone()
        };

        self.inner.sink.publish(PlaneEvent::Incident(incident.clone()));
        Ok(incident)
    }

    /// Move OPEN to IN_PROGRESS; no-op when already in progress
    pub fn begin_response(&self, id: &str) -> GuardResult<Incident> {
        let (incident, changed) = {
            let mut book = self.book();
            let status = book.get(id)?.status;
            let changed = match status {
                IncidentStatus::Open => {
                    book.commit(self.status_record(id, status, IncidentStatus::InProgress))?;
                    true
                }
                IncidentStatus::InProgress => false,
                IncidentStatus::Resolved => {
                    return Err(GuardError::InvalidTransition {
                        incident: id.to_string(),
                        from: status,
                        to: IncidentStatus::InProgress,
                    });
                }
            };
            (book.get(id)?.clone(), changed)
        };

        if changed {
            self.inner.sink.publish(PlaneEvent::Incident(incident.clone()));
        }
        Ok(incident)
    }

    /// Resolve; idempotent on an already resolved incident
    pub fn resolve(&self, id: &str) -> GuardResult<Incident> {
        let (incident, changed) = {
            let mut book = self.book();
            let status = book.get(id)?.status;
            let changed = if status == IncidentStatus::Resolved {
                false
            } else {
                book.commit(self.status_record(id, status, IncidentStatus::Resolved))?;
                self.inner
                    .metrics
                    .set_incidents_active(book.active_count() as i64);
                true
            };
            (book.get(id)?.clone(), changed)
        };

        if changed {
            self.inner.logger.log_incident_resolved(&incident);
            self.inner.sink.publish(PlaneEvent::Incident(incident.clone()));
        } else {
            debug!(incident_id = %id, "Incident already resolved");
        }
        Ok(incident)
    }

    /// Incidents never go back to OPEN; open a new one instead
    pub fn reopen(&self, id: &str) -> GuardResult<Incident> {
        let status = self.book().get(id)?.status;
        Err(GuardError::InvalidTransition {
            incident: id.to_string(),
            from: status,
            to: IncidentStatus::Open,
        })
    }

    fn status_record(&self, id: &str, from: IncidentStatus, to: IncidentStatus) -> IncidentRecord {
        IncidentRecord::Status {
            incident_id: id.to_string(),
            from,
            to,
            at: self.inner.clock.now(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Incident> {
        self.book().incidents.get(id).cloned()
    }

    /// All incidents in creation order
    pub fn list(&self) -> Vec<Incident> {
        self.book().ordered().cloned().collect()
    }

    /// Unresolved incidents in creation order
    pub fn active(&self) -> Vec<Incident> {
        self.book()
            .ordered()
            .filter(|i| i.status.is_active())
            .cloned()
            .collect()
    }

    pub fn oldest_active(&self) -> Option<Incident> {
        self.book()
            .ordered()
            .find(|i| i.status.is_active())
            .cloned()
    }

    /// Every status change in the order it happened
    pub fn history(&self) -> Vec<StatusChange> {
        self.book().history.clone()
    }

    pub fn history_for(&self, id: &str) -> Vec<StatusChange> {
        self.book()
            .history
            .iter()
            .filter(|c| c.incident_id == id)
            .cloned()
            .collect()
    }

    /// Turn an alert into an incident unless one for the same metric is
    /// still open inside the dedup window
    pub fn ingest_alert(&self, alert: &Alert) -> GuardResult<Option<Incident>> {
        let now = self.inner.clock.now();
        let window = self.inner.config.dedup_window();
        let duplicate = self.book().ordered().any(|i| {
            i.status.is_active()
                && elapsed_between(i.created_at, now) < window
                && matches!(&i.origin, IncidentOrigin::Alert { metric, .. } if *metric == alert.metric)
        });

        if duplicate {
            self.inner.metrics.inc_alerts_suppressed();
            debug!(
                alert_id = %alert.id,
                metric = %alert.metric,
                "Alert folded into open incident"
            );
            return Ok(None);
        }

        self.open_incident(IncidentType::for_metric(&alert.metric), alert.severity, Some(alert))
            .map(Some)
    }

    /// Open a dependency-failure incident when a breaker opens.
    ///
    /// Threshold trips and re-opens after a manual reset open one unless a
    /// recent incident for the dependency is still active. A failed half-open
    /// trial only opens one when no incident for the dependency is active at
    /// all, so an outage that outlives its incident is tracked again.
    pub fn ingest_transition(&self, transition: &Transition) -> GuardResult<Option<Incident>> {
        if transition.to != CircuitState::Open {
            return Ok(None);
        }
        let window = match transition.cause {
            TransitionCause::FailureThreshold | TransitionCause::FailureAfterReset => {
                Some(self.inner.config.dedup_window())
            }
            TransitionCause::ProbeFailed => None,
            _ => return Ok(None),
        };

        let now = self.inner.clock.now();
        let duplicate = self.book().ordered().any(|i| {
            i.status.is_active()
                && i.kind == IncidentType::DependencyFailure
                && i.target.as_deref() == Some(transition.dependency.as_str())
                && window.map_or(true, |w| elapsed_between(i.created_at, now) < w)
        });

        if duplicate {
            self.inner.metrics.inc_alerts_suppressed();
            debug!(
                dependency = %transition.dependency,
                cause = %transition.cause,
                "Breaker transition folded into open incident"
            );
            return Ok(None);
        }

        self.open(Draft {
            kind: IncidentType::DependencyFailure,
            severity: Severity::High,
            title: format!("Dependency {} unavailable", transition.dependency),
            target: Some(transition.dependency.clone()),
            origin: IncidentOrigin::Breaker,
        })
        .map(Some)
    }

    /// Consume alerts and breaker transitions until shutdown
    pub async fn run(
        self,
        mut alerts: mpsc::Receiver<Alert>,
        mut transitions: mpsc::Receiver<Transition>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting incident intake loop");

        loop {
            tokio::select! {
                Some(alert) = alerts.recv() => {
                    if let Err(e) = self.ingest_alert(&alert) {
                        warn!(alert_id = %alert.id, error = %e, "Failed to open incident from alert");
                    }
                }
                Some(transition) = transitions.recv() => {
                    if let Err(e) = self.ingest_transition(&transition) {
                        warn!(
                            dependency = %transition.dependency,
                            error = %e,
                            "Failed to open incident from breaker transition"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down incident intake loop");
                    break;
                }
                else => {
                    info!("Incident intake channels closed");
                    break;
                }
            }
        }
    }
}

/// Pass a new incident to recovery. A full channel defers the send to a
/// task instead of dropping the incident's automatic attempt.
fn hand_on(notify: &mpsc::Sender<Incident>, incident: Incident) {
    match notify.try_send(incident) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(incident)) => {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    debug!(incident_id = %incident.id, "Recovery channel full, deferring hand-off");
                    let notify = notify.clone();
                    runtime.spawn(async move {
                        let id = incident.id.clone();
                        if notify.send(incident).await.is_err() {
                            warn!(incident_id = %id, "Recovery channel closed before hand-off");
                        }
                    });
                }
                Err(_) => warn!(
                    incident_id = %incident.id,
                    "Recovery channel full outside a runtime, incident needs manual recovery"
                ),
            }
        }
        Err(mpsc::error::TrySendError::Closed(incident)) => {
            warn!(incident_id = %incident.id, "Recovery channel closed, incident not handed on");
        }
    }
}

/// Builder for [`IncidentManager`]
pub struct IncidentManagerBuilder {
    config: IncidentConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    notify: Option<mpsc::Sender<Incident>>,
    logger: StructuredLogger,
}

impl IncidentManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Channel that receives every newly opened incident
    pub fn notify(mut self, tx: mpsc::Sender<Incident>) -> Self {
        self.notify = Some(tx);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Build, replaying the journal when one is configured
    pub fn build(self) -> GuardResult<IncidentManager> {
        let mut book = Book::default();
        if let Some(path) = &self.config.journal_path {
            let (journal, records) = Journal::open(path)?;
            for record in records {
                book.apply(record);
            }
            book.journal = Some(journal);
            info!(
                incidents = book.incidents.len(),
                active = book.active_count(),
                "Incident state restored from journal"
            );
        }

        let metrics = GuardMetrics::new();
        metrics.set_incidents_active(book.active_count() as i64);

        Ok(IncidentManager {
            inner: Arc::new(Inner {
                config: self.config,
                book: Mutex::new(book),
                clock: self.clock,
                sink: self.sink,
                notify: self.notify,
                metrics,
                logger: self.logger,
            }),
        })
    }
}
