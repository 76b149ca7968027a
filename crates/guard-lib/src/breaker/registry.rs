//! Per-dependency breakers keyed by dependency id
//!
//! Each dependency's record sits behind its own mutex inside a `DashMap`, so
//! transitions for one dependency are serialized without a global lock.
//! The audit log append happens while the entry lock is held, which keeps
//! each dependency's entries in the order they occurred.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::state::{BreakerSnapshot, BreakerState, CircuitState, Transition, TransitionCause};
use crate::clock::{elapsed_between, Clock, SystemClock};
use crate::config::BreakerConfig;
use crate::error::{CallError, GuardError, GuardResult};
use crate::events::{EventSink, NullSink, PlaneEvent};
use crate::observability::{GuardMetrics, StructuredLogger};

type Entry = Arc<Mutex<BreakerState>>;

struct Inner {
    config: BreakerConfig,
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    audit: Mutex<Vec<Transition>>,
    next_seq: AtomicU64,
    sink: Arc<dyn EventSink>,
    listener: Option<mpsc::Sender<Transition>>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

fn lock(entry: &Entry) -> MutexGuard<'_, BreakerState> {
    entry.lock().unwrap_or_else(|p| p.into_inner())
}

impl Inner {
    fn entry(&self, dependency: &str) -> Entry {
        if let Some(entry) = self.entries.get(dependency) {
            return entry.clone();
        }
        self.entries
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BreakerState::new(self.clock.now()))))
            .clone()
    }

    /// Apply a transition. Must be called with the entry lock held.
    fn transition(
        &self,
        dependency: &str,
        state: &mut BreakerState,
        to: CircuitState,
        cause: TransitionCause,
    ) -> Transition {
        let now = self.clock.now();
        let from = state.enter(to, now);

        let transition = {
            let mut audit = self.audit.lock().unwrap_or_else(|p| p.into_inner());
            let transition = Transition {
                seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                dependency: dependency.to_string(),
                from,
                to,
                cause,
                at: now,
            };
            audit.push(transition.clone());
            transition
        };

        self.metrics
            .record_transition(dependency, &to.to_string());
        self.logger.log_transition(&transition);
        self.sink.publish(PlaneEvent::Transition(transition.clone()));
        if let Some(listener) = &self.listener {
            if let Err(e) = listener.try_send(transition.clone()) {
                warn!(dependency = %dependency, error = %e, "Dropped breaker transition for listener");
            }
        }
        transition
    }

    fn record(&self, dependency: &str, entry: &Entry, epoch: u64, probe: bool, success: bool) {
        let mut state = lock(entry);
        if state.epoch != epoch {
            debug!(
                dependency = %dependency,
                success,
                "Ignoring outcome reported against an earlier breaker state"
            );
            return;
        }

        match state.state {
            CircuitState::Closed => {
                if success {
                    state.failures = 0;
                    state.probation = false;
                } else if state.probation && self.config.reopen_on_first_failure_after_reset {
                    self.transition(
                        dependency,
                        &mut state,
                        CircuitState::Open,
                        TransitionCause::FailureAfterReset,
                    );
                } else {
                    state.probation = false;
                    state.failures += 1;
                    if state.failures >= self.config.failure_threshold {
                        self.transition(
                            dependency,
                            &mut state,
                            CircuitState::Open,
                            TransitionCause::FailureThreshold,
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                if probe {
                    state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
                }
                if success {
                    state.successes += 1;
                    if state.successes >= self.config.half_open_trial_count {
                        self.transition(
                            dependency,
                            &mut state,
                            CircuitState::Closed,
                            TransitionCause::ProbeSucceeded,
                        );
                    }
                } else {
                    self.transition(
                        dependency,
                        &mut state,
                        CircuitState::Open,
                        TransitionCause::ProbeFailed,
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    fn release_probe(&self, entry: &Entry, epoch: u64) {
        let mut state = lock(entry);
        if state.epoch == epoch && state.state == CircuitState::HalfOpen {
            state.probes_in_flight = state.probes_in_flight.saturating_sub(1);
        }
    }
}

/// Registry of circuit breakers, one per dependency
#[derive(Clone)]
pub struct BreakerRegistry {
    inner: Arc<Inner>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: BreakerConfig) -> BreakerRegistryBuilder {
        BreakerRegistryBuilder {
            config,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            listener: None,
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.inner.config
    }

    /// Ask to call `dependency`. Rejects immediately while open.
    pub fn acquire(&self, dependency: &str) -> GuardResult<Permit> {
        let inner = &self.inner;
        let entry = inner.entry(dependency);
        let mut state = lock(&entry);

        if state.state == CircuitState::Open
            && elapsed_between(state.last_transition, inner.clock.now())
                >= inner.config.reset_timeout()
        {
            inner.transition(
                dependency,
                &mut state,
                CircuitState::HalfOpen,
                TransitionCause::ResetTimeout,
            );
        }

        let probe = match state.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen
                if state.successes + state.probes_in_flight
                    < inner.config.half_open_trial_count =>
            {
                state.probes_in_flight += 1;
                true
            }
            CircuitState::Open | CircuitState::HalfOpen => {
                inner.metrics.inc_breaker_rejections(dependency);
                return Err(GuardError::DependencyUnavailable {
                    dependency: dependency.to_string(),
                });
            }
        };
        let epoch = state.epoch;
        drop(state);

        Ok(Permit {
            inner: inner.clone(),
            dependency: dependency.to_string(),
            entry,
            epoch,
            probe,
            reported: false,
        })
    }

    /// Run `call` through the breaker, recording its outcome
    pub async fn call<T, E, F>(&self, dependency: &str, call: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire(dependency).map_err(CallError::from_guard)?;
        match call.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CallError::Upstream(e))
            }
        }
    }

    /// Force `dependency` closed regardless of counters
    pub fn force_reset(&self, dependency: &str) -> Transition {
        let inner = &self.inner;
        let entry = inner.entry(dependency);
        let mut state = lock(&entry);

        let transition = inner.transition(
            dependency,
            &mut state,
            CircuitState::Closed,
            TransitionCause::Manual,
        );
        state.probation = inner.config.reopen_on_first_failure_after_reset;
        transition
    }

    /// Current state without side effects. Unknown dependencies read as closed.
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.inner
            .entries
            .get(dependency)
            .map(|e| lock(e.value()).state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Whether an open breaker would admit a probe on the next call
    pub fn probe_due(&self, dependency: &str) -> bool {
        self.inner
            .entries
            .get(dependency)
            .map(|e| {
                let state = lock(e.value());
                state.state == CircuitState::Open
                    && elapsed_between(state.last_transition, self.inner.clock.now())
                        >= self.inner.config.reset_timeout()
            })
            .unwrap_or(false)
    }

    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        deps.sort();
        deps
    }

    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .inner
            .entries
            .iter()
            .map(|e| {
                let state = lock(e.value());
                BreakerSnapshot {
                    dependency: e.key().clone(),
                    state: state.state,
                    failures: state.failures,
                    successes: state.successes,
                    last_transition: state.last_transition,
                    probation: state.probation,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        snapshots
    }

    /// Every recorded transition in the order it occurred
    pub fn transitions(&self) -> Vec<Transition> {
        self.inner
            .audit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn transitions_for(&self, dependency: &str) -> Vec<Transition> {
        self.inner
            .audit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|t| t.dependency == dependency)
            .cloned()
            .collect()
    }

    /// Time of the last transition for `dependency`
    pub fn last_transition(&self, dependency: &str) -> Option<DateTime<Utc>> {
        self.inner
            .entries
            .get(dependency)
            .map(|e| lock(e.value()).last_transition)
    }
}

/// Builder for [`BreakerRegistry`]
pub struct BreakerRegistryBuilder {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    listener: Option<mpsc::Sender<Transition>>,
    logger: StructuredLogger,
}

impl BreakerRegistryBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Push every transition to the notification sink
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Deliver every transition to a channel consumer
    pub fn listener(mut self, tx: mpsc::Sender<Transition>) -> Self {
        self.listener = Some(tx);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> BreakerRegistry {
        BreakerRegistry {
            inner: Arc::new(Inner {
                config: self.config,
                entries: DashMap::new(),
                clock: self.clock,
                audit: Mutex::new(Vec::new()),
                next_seq: AtomicU64::new(0),
                sink: self.sink,
                listener: self.listener,
                metrics: GuardMetrics::new(),
                logger: self.logger,
            }),
        }
    }
}

/// Admission to call a dependency once
///
/// Report the outcome with [`Permit::success`] or [`Permit::failure`].
/// Dropping an unreported probe frees its half-open slot without counting
/// as either outcome.
pub struct Permit {
    inner: Arc<Inner>,
    dependency: String,
    entry: Entry,
    epoch: u64,
    probe: bool,
    reported: bool,
}

impl Permit {
    /// True when this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn success(mut self) {
        self.report(true);
    }

    pub fn failure(mut self) {
        self.report(false);
    }

    pub fn record(mut self, success: bool) {
        self.report(success);
    }

    fn report(&mut self, success: bool) {
        self.reported = true;
        self.inner
            .record(&self.dependency, &self.entry, self.epoch, self.probe, success);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.reported && self.probe {
            self.inner.release_probe(&self.entry, self.epoch);
        }
    }
}
