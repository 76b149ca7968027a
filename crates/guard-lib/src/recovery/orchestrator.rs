//! Incident-driven recovery
//!
//! Picks a procedure from the incident type, runs it off the request path
//! under a deadline, records every step on the incident and keeps an
//! append-only history of attempts. At most one automatic attempt is made
//! per incident; anything further needs an operator.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::hooks::{LoggingHooks, RemediationHooks};
use crate::breaker::{BreakerRegistry, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::config::RecoveryConfig;
use crate::error::{GuardError, GuardResult};
use crate::events::{EventSink, NullSink, PlaneEvent};
use crate::incident::IncidentManager;
use crate::journal::Journal;
use crate::models::{ActionOutcome, Incident, RecoveryAttempt, RecoveryProcedure, ResponseAction};
use crate::observability::{GuardMetrics, StructuredLogger};

#[derive(Default)]
struct AttemptBook {
    attempts: Vec<RecoveryAttempt>,
    journal: Option<Journal<RecoveryAttempt>>,
}

struct Inner {
    config: RecoveryConfig,
    incidents: IncidentManager,
    breakers: BreakerRegistry,
    hooks: Arc<dyn RemediationHooks>,
    book: Mutex<AttemptBook>,
    auto_attempted: Mutex<HashSet<String>>,
    running: Mutex<HashSet<String>>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

/// Marks an incident as having an attempt in flight
struct Running<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

/// Runs remediation procedures for incidents
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

impl RecoveryOrchestrator {
    pub fn builder(
        config: RecoveryConfig,
        incidents: IncidentManager,
        breakers: BreakerRegistry,
    ) -> RecoveryOrchestratorBuilder {
        RecoveryOrchestratorBuilder {
            config,
            incidents,
            breakers,
            hooks: Arc::new(LoggingHooks),
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            logger: StructuredLogger::new("local"),
        }
    }

    /// Automatic reaction to a newly opened incident
    ///
    /// Returns `None` when automatic recovery is disabled, the incident is
    /// already resolved, or it already had its automatic attempt.
    pub async fn on_incident(&self, incident: Incident) -> GuardResult<Option<RecoveryAttempt>> {
        if !self.inner.config.auto_recover {
            debug!(incident_id = %incident.id, "Automatic recovery disabled");
            return Ok(None);
        }
        if !incident.status.is_active() {
            return Ok(None);
        }
        if !lock(&self.inner.auto_attempted).insert(incident.id.clone()) {
            debug!(
                incident_id = %incident.id,
                "Incident already had its automatic attempt"
            );
            return Ok(None);
        }

        self.run_attempt(incident, true).await.map(Some)
    }

    /// Operator-invoked recovery for `incident_id`, or for the oldest
    /// unresolved incident
    pub async fn trigger_manual_recovery(
        &self,
        incident_id: Option<&str>,
    ) -> GuardResult<RecoveryAttempt> {
        let incident = match incident_id {
            Some(id) => self
                .inner
                .incidents
                .get(id)
                .ok_or_else(|| GuardError::IncidentNotFound(id.to_string()))?,
            None => self
                .inner
                .incidents
                .oldest_active()
                .ok_or(GuardError::NothingToRecover)?,
        };

        self.run_attempt(incident, false).await
    }

    /// Run a manual recovery on its own task
    pub fn spawn_manual(&self, incident_id: Option<String>) -> JoinHandle<GuardResult<RecoveryAttempt>> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator
                .trigger_manual_recovery(incident_id.as_deref())
                .await
        })
    }

    async fn run_attempt(&self, incident: Incident, automatic: bool) -> GuardResult<RecoveryAttempt> {
        let inner = &self.inner;
        let procedure = RecoveryProcedure::for_incident(incident.kind);

        if !lock(&inner.running).insert(incident.id.clone()) {
            return Err(GuardError::RemediationFailed {
                step: procedure.to_string(),
                reason: format!("recovery already running for incident {}", incident.id),
            });
        }
        let _running = Running {
            set: &inner.running,
            id: incident.id.clone(),
        };

        inner.incidents.begin_response(&incident.id)?;
        let started_at = inner.clock.now();
        info!(
            event = "recovery_started",
            incident_id = %incident.id,
            procedure = %procedure,
            automatic,
            "Recovery procedure started"
        );

        let timeout = inner.config.timeout();
        let (success, timed_out, error) =
            match tokio::time::timeout(timeout, self.execute(procedure, &incident)).await {
                Ok(Ok(())) => (true, false, None),
                Ok(Err(e)) => (false, false, Some(e.to_string())),
                Err(_) => {
                    let err = GuardError::RecoveryTimeout {
                        incident: incident.id.clone(),
                        timeout,
                    };
                    self.record(
                        &incident.id,
                        &procedure.to_string(),
                        ActionOutcome::TimedOut,
                        Some(err.to_string()),
                    )?;
                    (false, true, Some(err.to_string()))
                }
            };

        if success {
            inner.incidents.resolve(&incident.id)?;
        }

        let attempt = RecoveryAttempt {
            id: uuid::Uuid::new_v4().to_string(),
            incident_id: incident.id.clone(),
            procedure,
            started_at,
            completed_at: inner.clock.now(),
            success,
            automatic,
            timed_out,
            error,
        };

        {
            let mut book = lock(&inner.book);
            if let Some(journal) = book.journal.as_mut() {
                journal.append(&attempt)?;
            }
            book.attempts.push(attempt.clone());
        }

        inner
            .metrics
            .record_recovery(&procedure.to_string(), attempt.success);
        inner.logger.log_recovery(&attempt);
        inner.sink.publish(PlaneEvent::Recovery(attempt.clone()));
        Ok(attempt)
    }

    async fn execute(&self, procedure: RecoveryProcedure, incident: &Incident) -> GuardResult<()> {
        let inner = &self.inner;
        let target = incident.target.as_deref();

        match procedure {
            RecoveryProcedure::ResetBreaker => {
                let dependency = match target {
                    Some(dependency) => dependency,
                    None => {
                        let reason = "incident names no dependency".to_string();
                        self.record(
                            &incident.id,
                            "reset_breaker",
                            ActionOutcome::Skipped,
                            Some(reason.clone()),
                        )?;
                        return Err(GuardError::RemediationFailed {
                            step: "reset_breaker".to_string(),
                            reason,
                        });
                    }
                };

                if inner.config.health_check_before_reset {
                    self.step(
                        &incident.id,
                        "check_dependency",
                        inner.hooks.check_dependency(dependency),
                    )
                    .await?;
                }
                let transition = inner.breakers.force_reset(dependency);
                self.record(
                    &incident.id,
                    "force_reset",
                    ActionOutcome::Succeeded,
                    Some(format!("{}: {} -> {}", dependency, transition.from, transition.to)),
                )?;
            }
            RecoveryProcedure::ScaleOut => {
                self.step(&incident.id, "request_scale_out", inner.hooks.request_scale_out())
                    .await?;
            }
            RecoveryProcedure::RotateCredentials => {
                self.step(
                    &incident.id,
                    "rotate_credentials",
                    inner.hooks.rotate_credentials(target),
                )
                .await?;

                let dependencies = match target {
                    Some(dependency) => vec![dependency.to_string()],
                    None => inner.breakers.dependencies(),
                };
                let mut reset = 0;
                for dependency in dependencies {
                    if inner.breakers.state(&dependency) != CircuitState::Closed {
                        let transition = inner.breakers.force_reset(&dependency);
                        self.record(
                            &incident.id,
                            "force_reset",
                            ActionOutcome::Succeeded,
                            Some(format!(
                                "{}: {} -> {}",
                                dependency, transition.from, transition.to
                            )),
                        )?;
                        reset += 1;
                    }
                }
                self.record(
                    &incident.id,
                    "verify_closed",
                    ActionOutcome::Succeeded,
                    Some(format!("{} breaker(s) forced closed", reset)),
                )?;
            }
            RecoveryProcedure::Restart => {
                self.step(&incident.id, "restart", inner.hooks.restart(target))
                    .await?;
            }
        }
        Ok(())
    }

    /// Run one hook and record its outcome on the incident
    async fn step<F>(&self, incident_id: &str, name: &str, hook: F) -> GuardResult<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match hook.await {
            Ok(()) => {
                self.record(incident_id, name, ActionOutcome::Succeeded, None)?;
                Ok(())
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(incident_id = %incident_id, step = %name, error = %reason, "Remediation step failed");
                self.record(incident_id, name, ActionOutcome::Failed, Some(reason.clone()))?;
                Err(GuardError::RemediationFailed {
                    step: name.to_string(),
                    reason,
                })
            }
        }
    }

    fn record(
        &self,
        incident_id: &str,
        action: &str,
        outcome: ActionOutcome,
        detail: Option<String>,
    ) -> GuardResult<()> {
        self.inner.incidents.append_action(
            incident_id,
            ResponseAction {
                action: action.to_string(),
                timestamp: self.inner.clock.now(),
                outcome,
                detail,
            },
        )?;
        Ok(())
    }

    /// Every recorded attempt in completion order
    pub fn attempts(&self) -> Vec<RecoveryAttempt> {
        lock(&self.inner.book).attempts.clone()
    }

    pub fn attempts_for(&self, incident_id: &str) -> Vec<RecoveryAttempt> {
        lock(&self.inner.book)
            .attempts
            .iter()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect()
    }

    /// React to incidents until shutdown, each on its own task
    pub async fn run(
        self,
        mut incidents: mpsc::Receiver<Incident>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(
            auto_recover = self.inner.config.auto_recover,
            timeout_secs = self.inner.config.timeout_secs,
            "Starting recovery orchestrator"
        );

        loop {
            tokio::select! {
                Some(incident) = incidents.recv() => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        let id = incident.id.clone();
                        if let Err(e) = orchestrator.on_incident(incident).await {
                            warn!(incident_id = %id, error = %e, "Automatic recovery failed to run");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("Shutting down recovery orchestrator");
                    break;
                }
            }
        }
    }
}

/// Builder for [`RecoveryOrchestrator`]
pub struct RecoveryOrchestratorBuilder {
    config: RecoveryConfig,
    incidents: IncidentManager,
    breakers: BreakerRegistry,
    hooks: Arc<dyn RemediationHooks>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    logger: StructuredLogger,
}

impl RecoveryOrchestratorBuilder {
    pub fn hooks(mut self, hooks: Arc<dyn RemediationHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Build, reloading the attempt journal when one is configured
    pub fn build(self) -> GuardResult<RecoveryOrchestrator> {
        let mut book = AttemptBook::default();
        if let Some(path) = &self.config.journal_path {
            let (journal, attempts) = Journal::open(path)?;
            book.attempts = attempts;
            book.journal = Some(journal);
        }

        let auto_attempted: HashSet<String> = book
            .attempts
            .iter()
            .filter(|a| a.automatic)
            .map(|a| a.incident_id.clone())
            .collect();

        Ok(RecoveryOrchestrator {
            inner: Arc::new(Inner {
                config: self.config,
                incidents: self.incidents,
                breakers: self.breakers,
                hooks: self.hooks,
                book: Mutex::new(book),
                auto_attempted: Mutex::new(auto_attempted),
                running: Mutex::new(HashSet::new()),
                clock: self.clock,
                sink: self.sink,
                metrics: GuardMetrics::new(),
                logger: self.logger,
            }),
        })
    }
}
