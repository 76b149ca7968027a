//! Tests for the health monitor

use super::*;
use crate::clock::ManualClock;
use crate::config::MonitorConfig;
use crate::events::BroadcastSink;
use crate::models::{metric, Severity};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

fn config() -> MonitorConfig {
    MonitorConfig {
        interval_secs: 1,
        sample_timeout_ms: 200,
        ring_capacity: 4,
        ..Default::default()
    }
}

fn calm() -> MetricsReading {
    MetricsReading {
        cpu: 0.30,
        memory: 0.40,
        error_rate: 0.01,
        avg_response_time_ms: 120.0,
        request_count: 50,
    }
}

fn monitor_with(
    source: Arc<StaticMetricsSource>,
) -> (HealthMonitor, mpsc::Receiver<crate::models::Alert>) {
    let (tx, rx) = mpsc::channel(16);
    let monitor = HealthMonitor::builder()
        .config(config())
        .source(source)
        .clock(Arc::new(ManualClock::at_unix(1_700_000_000)))
        .alerts(tx)
        .build()
        .unwrap();
    (monitor, rx)
}

#[test]
fn test_derive_status_counts_breaches() {
    assert_eq!(derive_status(0), HealthStatus::Healthy);
    assert_eq!(derive_status(1), HealthStatus::Degraded);
    assert_eq!(derive_status(2), HealthStatus::Critical);
    assert_eq!(derive_status(3), HealthStatus::Critical);
}

#[test]
fn test_value_equal_to_threshold_is_not_a_breach() {
    let thresholds = config().thresholds;
    let sample = HealthSample {
        timestamp: chrono::Utc::now(),
        cpu: 0.80,
        memory: 0.86,
        error_rate: 0.0,
        avg_response_time_ms: 0.0,
        request_count: 0,
        dependencies: Default::default(),
    };

    assert_eq!(breached_metrics(&sample, &thresholds), vec![metric::MEMORY.to_string()]);
}

#[test]
fn test_builder_requires_source() {
    assert!(HealthMonitor::builder().config(config()).build().is_err());
}

#[tokio::test]
async fn test_cpu_breach_raises_one_alert() {
    let source = Arc::new(StaticMetricsSource::new(MetricsReading {
        cpu: 0.92,
        ..calm()
    }));
    let (monitor, mut rx) = monitor_with(source);

    let outcome = monitor.tick().await;

    let alerts = match outcome {
        TickOutcome::Complete { alerts, .. } => alerts,
        TickOutcome::Incomplete { reason } => panic!("tick incomplete: {}", reason),
    };
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, metric::CPU);
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert_eq!(alerts[0].value, 0.92);
    assert_eq!(alerts[0].threshold, 0.80);

    let delivered = rx.try_recv().unwrap();
    assert_eq!(delivered.id, alerts[0].id);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_consecutive_breaching_ticks_raise_consecutive_alerts() {
    let source = Arc::new(StaticMetricsSource::new(MetricsReading {
        cpu: 0.95,
        ..calm()
    }));
    let (monitor, mut rx) = monitor_with(source);

    monitor.tick().await;
    monitor.tick().await;

    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_status_follows_latest_sample() {
    let source = Arc::new(StaticMetricsSource::new(calm()));
    let (monitor, _rx) = monitor_with(source.clone());

    let report = monitor.status().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert!(report.latest.is_none());

    source.set(MetricsReading {
        cpu: 0.90,
        ..calm()
    });
    monitor.tick().await;
    assert_eq!(monitor.status().await.status, HealthStatus::Degraded);

    source.set(MetricsReading {
        cpu: 0.90,
        memory: 0.95,
        error_rate: 0.20,
        ..calm()
    });
    monitor.tick().await;
    let report = monitor.status().await;
    assert_eq!(report.status, HealthStatus::Critical);
    assert_eq!(
        report.breached,
        vec![
            metric::CPU.to_string(),
            metric::ERROR_RATE.to_string(),
            metric::MEMORY.to_string()
        ]
    );

    source.set(calm());
    monitor.tick().await;
    assert_eq!(monitor.status().await.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn test_ring_keeps_most_recent_samples() {
    let source = Arc::new(StaticMetricsSource::new(calm()));
    let (monitor, _rx) = monitor_with(source.clone());

    for n in 0..6u64 {
        source.set(MetricsReading {
            request_count: n,
            ..calm()
        });
        monitor.tick().await;
    }

    let counts: Vec<u64> = monitor.recent(10).await.iter().map(|s| s.request_count).collect();
    assert_eq!(counts, vec![2, 3, 4, 5]);
    assert_eq!(monitor.status().await.ring.evicted, 2);
}

#[tokio::test]
async fn test_failed_read_is_incomplete_and_discarded() {
    let source = Arc::new(StaticMetricsSource::new(MetricsReading {
        cpu: 0.99,
        ..calm()
    }));
    source.fail_with(Some("proc unavailable"));
    let (monitor, mut rx) = monitor_with(source);

    let outcome = monitor.tick().await;

    match outcome {
        TickOutcome::Incomplete { reason } => assert!(reason.contains("proc unavailable")),
        TickOutcome::Complete { .. } => panic!("expected incomplete tick"),
    }
    assert!(monitor.recent(10).await.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_slow_read_times_out() {
    let source = Arc::new(StaticMetricsSource::new(MetricsReading {
        cpu: 0.99,
        ..calm()
    }));
    source.set_delay(Some(std::time::Duration::from_millis(800)));
    let (monitor, mut rx) = monitor_with(source);

    let outcome = monitor.tick().await;

    assert!(matches!(outcome, TickOutcome::Incomplete { .. }));
    assert!(monitor.recent(10).await.is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_samples_reach_subscribers() {
    let sink = Arc::new(BroadcastSink::new(16));
    let mut events = sink.subscribe();
    let monitor = HealthMonitor::builder()
        .config(config())
        .source(Arc::new(StaticMetricsSource::new(calm())))
        .sink(sink.clone())
        .build()
        .unwrap();

    monitor.tick().await;

    match events.recv().await.unwrap() {
        crate::events::PlaneEvent::Sample(sample) => assert_eq!(sample.request_count, 50),
        other => panic!("unexpected event {}", other.name()),
    }
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let source = Arc::new(StaticMetricsSource::new(calm()));
    let (monitor, _rx) = monitor_with(source);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(monitor.clone().run(shutdown_rx));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    // The first tick fires immediately
    assert!(!monitor.recent(1).await.is_empty());
}

fn monitor_with_traffic(
    source: Arc<StaticMetricsSource>,
    traffic: TrafficRecorder,
) -> (HealthMonitor, mpsc::Receiver<crate::models::Alert>) {
    let (tx, rx) = mpsc::channel(16);
    let monitor = HealthMonitor::builder()
        .config(config())
        .source(source)
        .traffic(traffic)
        .clock(Arc::new(ManualClock::at_unix(1_700_000_000)))
        .alerts(tx)
        .build()
        .unwrap();
    (monitor, rx)
}

#[tokio::test]
async fn test_failing_dependency_is_visible_per_dependency() {
    let traffic = TrafficRecorder::new();
    let (monitor, mut rx) = monitor_with_traffic(Arc::new(StaticMetricsSource::new(calm())), traffic.clone());

    for _ in 0..4 {
        traffic.record("legacy-erp", false, std::time::Duration::from_millis(900));
    }
    for _ in 0..16 {
        traffic.record("geo", true, std::time::Duration::from_millis(20));
    }

    let sample = match monitor.tick().await {
        TickOutcome::Complete { sample, .. } => sample,
        TickOutcome::Incomplete { reason } => panic!("unexpected incomplete tick: {}", reason),
    };

    assert_eq!(sample.request_count, 20);
    assert!((sample.error_rate - 0.2).abs() < 1e-9);
    let erp = sample.dependencies["legacy-erp"];
    assert_eq!(erp.request_count, 4);
    assert!((erp.error_rate - 1.0).abs() < 1e-9);
    assert!((erp.avg_response_time_ms - 900.0).abs() < 1e-6);
    assert_eq!(sample.dependencies["geo"].error_rate, 0.0);

    // Overall error rate over threshold raises the alert
    assert_eq!(rx.try_recv().unwrap().metric, metric::ERROR_RATE);

    let latest = monitor.status().await.latest.unwrap();
    assert_eq!(latest.dependencies.len(), 2);
    assert_eq!(traffic.peek().overall.requests, 0);
}

#[tokio::test]
async fn test_incomplete_tick_keeps_traffic_for_next_sample() {
    let source = Arc::new(StaticMetricsSource::new(calm()));
    let traffic = TrafficRecorder::new();
    let (monitor, _rx) = monitor_with_traffic(source.clone(), traffic.clone());
    traffic.record("legacy-erp", false, std::time::Duration::from_millis(50));

    source.set_delay(Some(std::time::Duration::from_millis(800)));
    assert!(matches!(monitor.tick().await, TickOutcome::Incomplete { .. }));
    assert_eq!(traffic.peek().overall.requests, 1);

    source.set_delay(None);
    traffic.record("legacy-erp", true, std::time::Duration::from_millis(50));
    match monitor.tick().await {
        TickOutcome::Complete { sample, .. } => {
            assert_eq!(sample.request_count, 2);
            assert_eq!(sample.dependencies["legacy-erp"].request_count, 2);
        }
        TickOutcome::Incomplete { reason } => panic!("unexpected incomplete tick: {}", reason),
    }
}
