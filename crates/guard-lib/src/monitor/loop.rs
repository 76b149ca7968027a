//! Health sampling loop
//!
//! A single background task reads the metrics source once per interval.
//! Each read runs on a blocking thread bounded by the sample timeout; a read
//! that errors or overruns is recorded as incomplete and discarded. The
//! traffic window is only drained after a completed read, so requests seen
//! during an incomplete tick are carried into the next sample.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::ring::SampleRing;
use super::traffic::TrafficRecorder;
use super::{breached_metrics, derive_status, HealthReport, MetricsReading, MetricsSource};
use crate::clock::{Clock, SystemClock};
use crate::config::MonitorConfig;
use crate::events::{EventSink, NullSink, PlaneEvent};
use crate::models::{Alert, HealthSample};
use crate::observability::{GuardMetrics, StructuredLogger};

/// Result of one sampling tick
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Complete {
        sample: HealthSample,
        alerts: Vec<Alert>,
    },
    /// Read failed or timed out; nothing was recorded
    Incomplete { reason: String },
}

struct Inner {
    config: MonitorConfig,
    source: Arc<dyn MetricsSource>,
    traffic: Option<TrafficRecorder>,
    ring: RwLock<SampleRing>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    alerts_tx: Option<mpsc::Sender<Alert>>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

/// Periodic health sampler; clones share the same history
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<Inner>,
}

impl HealthMonitor {
    pub fn builder() -> HealthMonitorBuilder {
        HealthMonitorBuilder::new()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn thresholds(&self) -> &HashMap<String, f64> {
        &self.inner.config.thresholds
    }

    /// Sample until `shutdown` fires
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.inner.config.interval_secs,
            sample_timeout_ms = self.inner.config.sample_timeout_ms,
            "Starting health monitor loop"
        );

        let mut ticker = interval(self.inner.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    if let TickOutcome::Complete { alerts, .. } = self.tick().await {
                        if ticks % 6 == 0 || !alerts.is_empty() {
                            debug!(ticks, alerts = alerts.len(), "Health sampling cycle complete");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down health monitor loop");
                    break;
                }
            }
        }
    }

    /// Take one sample, record it and raise alerts for breached thresholds
    pub async fn tick(&self) -> TickOutcome {
        let inner = &self.inner;
        let start = Instant::now();

        let reading = match self.read_bounded().await {
            Ok(reading) => reading,
            Err(reason) => {
                inner
                    .metrics
                    .record_sample(false, start.elapsed().as_secs_f64());
                warn!(reason = %reason, "Health sample incomplete, discarded");
                return TickOutcome::Incomplete { reason };
            }
        };
        inner
            .metrics
            .record_sample(true, start.elapsed().as_secs_f64());

        let now = inner.clock.now();
        let mut sample = HealthSample {
            timestamp: now,
            cpu: reading.cpu,
            memory: reading.memory,
            error_rate: reading.error_rate,
            avg_response_time_ms: reading.avg_response_time_ms,
            request_count: reading.request_count,
            dependencies: Default::default(),
        };
        if let Some(traffic) = &inner.traffic {
            let window = traffic.drain();
            sample.error_rate = window.overall.error_rate();
            sample.avg_response_time_ms = window.overall.avg_latency_ms();
            sample.request_count = window.overall.requests;
            sample.dependencies = window
                .per_dependency
                .into_iter()
                .map(|(dependency, counts)| (dependency, counts.into()))
                .collect();
        }

        inner.ring.write().await.push(sample.clone());
        inner.sink.publish(PlaneEvent::Sample(sample.clone()));

        let breached = breached_metrics(&sample, &inner.config.thresholds);
        inner
            .metrics
            .set_health_status(derive_status(breached.len()).level());

        let mut alerts = Vec::with_capacity(breached.len());
        for name in breached {
            let (value, threshold) = match (sample.metric(&name), inner.config.thresholds.get(&name)) {
                (Some(value), Some(threshold)) => (value, *threshold),
                _ => continue,
            };
            let alert = Alert::new(name, value, threshold, now);
            inner
                .metrics
                .inc_alerts(&alert.metric, &alert.severity.to_string());
            inner.logger.log_alert(&alert);
            inner.sink.publish(PlaneEvent::Alert(alert.clone()));

            if let Some(tx) = &inner.alerts_tx {
                if let Err(e) = tx.send(alert.clone()).await {
                    warn!(error = %e, "Failed to send alert to incident intake");
                }
            }
            alerts.push(alert);
        }

        TickOutcome::Complete { sample, alerts }
    }

    async fn read_bounded(&self) -> std::result::Result<MetricsReading, String> {
        let source = self.inner.source.clone();
        let timeout = self.inner.config.sample_timeout();
        let read = tokio::task::spawn_blocking(move || source.read());

        match tokio::time::timeout(timeout, read).await {
            Ok(Ok(Ok(reading))) => Ok(reading),
            Ok(Ok(Err(e))) => Err(format!("metrics read failed: {:#}", e)),
            Ok(Err(e)) => Err(format!("metrics read task failed: {}", e)),
            Err(_) => Err(format!("metrics read exceeded {:?}", timeout)),
        }
    }

    /// Status recomputed from the latest sample
    pub async fn status(&self) -> HealthReport {
        let ring = self.inner.ring.read().await;
        let latest = ring.latest().cloned();
        let breached = latest
            .as_ref()
            .map(|s| breached_metrics(s, &self.inner.config.thresholds))
            .unwrap_or_default();

        HealthReport {
            status: derive_status(breached.len()),
            latest,
            breached,
            ring: ring.stats(),
        }
    }

    /// Up to `n` most recent samples, oldest first
    pub async fn recent(&self, n: usize) -> Vec<HealthSample> {
        self.inner.ring.read().await.recent(n)
    }
}

/// Builder for [`HealthMonitor`]
pub struct HealthMonitorBuilder {
    config: MonitorConfig,
    source: Option<Arc<dyn MetricsSource>>,
    traffic: Option<TrafficRecorder>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    alerts_tx: Option<mpsc::Sender<Alert>>,
    logger: StructuredLogger,
}

impl HealthMonitorBuilder {
    pub fn new() -> Self {
        Self {
            config: MonitorConfig::default(),
            source: None,
            traffic: None,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            alerts_tx: None,
            logger: StructuredLogger::new("local"),
        }
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Guarded-call statistics; when set they replace the source's error
    /// rate, response time and request count
    pub fn traffic(mut self, traffic: TrafficRecorder) -> Self {
        self.traffic = Some(traffic);
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval_secs = interval.as_secs().max(1);
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

    /// Channel that receives every raised alert
    pub fn alerts(mut self, tx: mpsc::Sender<Alert>) -> Self {
        self.alerts_tx = Some(tx);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn build(self) -> Result<HealthMonitor> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Metrics source is required"))?;

        Ok(HealthMonitor {
            inner: Arc::new(Inner {
                ring: RwLock::new(SampleRing::new(self.config.ring_capacity)),
                config: self.config,
                source,
                traffic: self.traffic,
                clock: self.clock,
                sink: self.sink,
                alerts_tx: self.alerts_tx,
                metrics: GuardMetrics::new(),
                logger: self.logger,
            }),
        })
    }
}

impl Default for HealthMonitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
