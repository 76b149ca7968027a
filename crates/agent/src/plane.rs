//! Wires the control plane components together
//!
//! Alerts flow from the health monitor to incident intake, breaker
//! transitions from the registry to incident intake, and newly opened
//! incidents from the manager to the recovery orchestrator, all over bounded
//! channels. Every component publishes to one broadcast sink for the
//! dashboard stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use guard_lib::health::components;
use guard_lib::{
    Alert, BreakerRegistry, BroadcastSink, Clock, EventSink, Guard, HealthMonitor,
    HealthRegistry, InMemoryCounterStore, Incident, IncidentManager, MetricsSource, RateLimiter,
    RecoveryOrchestrator, RemediationHooks, StructuredLogger, SystemClock, TrafficRecorder,
    Transition,
};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::config::AgentConfig;

const CHANNEL_CAPACITY: usize = 256;

/// Built components plus the channel ends the background tasks consume
pub struct Plane {
    pub state: Arc<AppState>,
    store: Arc<InMemoryCounterStore>,
    alerts_rx: mpsc::Receiver<Alert>,
    transitions_rx: mpsc::Receiver<Transition>,
    incidents_rx: mpsc::Receiver<Incident>,
    fail_open: bool,
    store_check_interval: Duration,
}

impl Plane {
    /// Build every component. `source` supplies host readings; error rate
    /// and latency come from the traffic of guarded calls.
    pub fn build(
        config: &AgentConfig,
        hooks: Arc<dyn RemediationHooks>,
        source: Arc<dyn MetricsSource>,
    ) -> Result<Self> {
        let guard_config = &config.guard;
        let logger = StructuredLogger::new(&config.node_name);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let events = BroadcastSink::default();
        let sink: Arc<dyn EventSink> = Arc::new(events.clone());

        let (alerts_tx, alerts_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (transitions_tx, transitions_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (incidents_tx, incidents_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let store = Arc::new(InMemoryCounterStore::new(clock.clone()));
        let limiter = RateLimiter::new(guard_config.rate_limit.clone(), store.clone())
            .with_clock(clock.clone())
            .with_logger(logger.clone());

        let breakers = BreakerRegistry::builder(guard_config.breaker.clone())
            .clock(clock.clone())
            .sink(sink.clone())
            .listener(transitions_tx)
            .logger(logger.clone())
            .build();

        let traffic = TrafficRecorder::new();
        let monitor = HealthMonitor::builder()
            .config(guard_config.monitor.clone())
            .source(source)
            .traffic(traffic.clone())
            .clock(clock.clone())
            .sink(sink.clone())
            .alerts(alerts_tx)
            .logger(logger.clone())
            .build()?;

        let incidents = IncidentManager::builder(guard_config.incidents.clone())
            .clock(clock.clone())
            .sink(sink.clone())
            .notify(incidents_tx)
            .logger(logger.clone())
            .build()
            .context("Failed to restore incidents")?;

        let recovery = RecoveryOrchestrator::builder(
            guard_config.recovery.clone(),
            incidents.clone(),
            breakers.clone(),
        )
        .hooks(hooks)
        .clock(clock)
        .sink(sink)
        .logger(logger)
        .build()
        .context("Failed to restore recovery attempts")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let state = Arc::new(AppState {
            health_registry: HealthRegistry::new(),
            monitor,
            guard: Guard::new(Arc::new(limiter), breakers, traffic),
            incidents,
            recovery,
            events,
            client,
            dependencies: Arc::new(config.dependencies.clone()),
        });

        Ok(Self {
            state,
            store,
            alerts_rx,
            transitions_rx,
            incidents_rx,
            fail_open: guard_config.rate_limit.fail_open,
            store_check_interval: Duration::from_secs(config.store_check_interval_secs.max(1)),
        })
    }

    /// Register components, spawn the background tasks and mark the plane ready
    pub async fn start(self, shutdown: &broadcast::Sender<()>) -> (Arc<AppState>, Vec<JoinHandle<()>>) {
        let Plane {
            state,
            store,
            alerts_rx,
            transitions_rx,
            incidents_rx,
            fail_open,
            store_check_interval,
        } = self;
        let registry = state.health_registry.clone();
        for name in components::ALL {
            registry.register(name).await;
        }

        let mut handles = Vec::new();

        let monitor = state.monitor.clone();
        let rx = shutdown.subscribe();
        handles.push(supervise(registry.clone(), components::MONITOR, async move {
            monitor.run(rx).await
        }));

        let incidents = state.incidents.clone();
        let rx = shutdown.subscribe();
        handles.push(supervise(registry.clone(), components::INCIDENT_INTAKE, async move {
            incidents.run(alerts_rx, transitions_rx, rx).await
        }));

        let recovery = state.recovery.clone();
        let rx = shutdown.subscribe();
        handles.push(supervise(registry.clone(), components::RECOVERY, async move {
            recovery.run(incidents_rx, rx).await
        }));

        handles.push(tokio::spawn(watch_store(
            state.guard.clone(),
            store,
            registry.clone(),
            fail_open,
            store_check_interval,
            shutdown.subscribe(),
        )));

        registry.set_ready(true).await;
        info!(tasks = handles.len(), "Control plane started");
        (state, handles)
    }
}

/// Run a component loop and mark it unhealthy once it returns
fn supervise<F>(registry: HealthRegistry, component: &'static str, task: F) -> JoinHandle<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        task.await;
        registry.set_unhealthy(component, "Loop stopped").await;
        debug!(component = %component, "Component loop exited");
    })
}

/// Mirror limiter degradation into component health and sweep expired counters
async fn watch_store(
    guard: Guard,
    store: Arc<InMemoryCounterStore>,
    registry: HealthRegistry,
    fail_open: bool,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    let mut was_degraded = false;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let degraded = guard.limiter().is_degraded();
                if degraded != was_degraded {
                    if degraded {
                        warn!(fail_open, "Rate limiter running without its counter store");
                    } else {
                        info!("Counter store reachable again");
                    }
                    was_degraded = degraded;
                }
                registry.reflect_store(degraded, fail_open).await;

                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Expired counters purged");
                }
            }
            _ = shutdown.recv() => {
                debug!("Stopping counter store watch");
                break;
            }
        }
    }
}
