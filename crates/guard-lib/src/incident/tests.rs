//! Tests for the incident manager

use super::*;
use crate::breaker::{CircuitState, Transition, TransitionCause};
use crate::clock::{Clock, ManualClock};
use crate::config::IncidentConfig;
use crate::error::GuardError;
use crate::models::{
    metric, ActionOutcome, Alert, IncidentOrigin, IncidentStatus, IncidentType, Severity,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::{broadcast, mpsc};

fn manager() -> (IncidentManager, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let manager = IncidentManager::builder(IncidentConfig::default())
        .clock(clock.clone())
        .build()
        .unwrap();
    (manager, clock)
}

fn cpu_alert(clock: &ManualClock, value: f64) -> Alert {
    Alert::new(metric::CPU, value, 0.80, clock.now())
}

fn trip(dependency: &str, cause: TransitionCause) -> Transition {
    Transition {
        seq: 0,
        dependency: dependency.to_string(),
        from: CircuitState::Closed,
        to: CircuitState::Open,
        cause,
        at: chrono::Utc::now(),
    }
}

#[test]
fn test_cpu_alert_opens_resource_exhaustion_incident() {
    let (manager, clock) = manager();
    let alert = cpu_alert(&clock, 0.92);

    let incident = manager.ingest_alert(&alert).unwrap().unwrap();

    assert_eq!(incident.kind, IncidentType::ResourceExhaustion);
    assert_eq!(incident.severity, Severity::Medium);
    assert_eq!(incident.status, IncidentStatus::Open);
    assert_eq!(
        incident.origin,
        IncidentOrigin::Alert {
            alert_id: alert.id.clone(),
            metric: metric::CPU.to_string()
        }
    );
    assert_eq!(manager.list().len(), 1);
}

#[test]
fn test_error_rate_alert_opens_anomaly() {
    let (manager, clock) = manager();
    let alert = Alert::new(metric::ERROR_RATE, 0.2, 0.05, clock.now());

    let incident = manager.ingest_alert(&alert).unwrap().unwrap();

    assert_eq!(incident.kind, IncidentType::Anomaly);
    assert_eq!(incident.severity, Severity::Critical);
}

#[test]
fn test_repeat_alerts_fold_into_open_incident() {
    let (manager, clock) = manager();

    assert!(manager.ingest_alert(&cpu_alert(&clock, 0.92)).unwrap().is_some());
    clock.advance(Duration::from_secs(10));
    assert!(manager.ingest_alert(&cpu_alert(&clock, 0.95)).unwrap().is_none());

    // A different metric is its own incident
    let memory = Alert::new(metric::MEMORY, 0.9, 0.85, clock.now());
    assert!(manager.ingest_alert(&memory).unwrap().is_some());
    assert_eq!(manager.list().len(), 2);
}

#[test]
fn test_alert_after_dedup_window_opens_new_incident() {
    let (manager, clock) = manager();
    manager.ingest_alert(&cpu_alert(&clock, 0.92)).unwrap();

    clock.advance(Duration::from_secs(15 * 60));

    assert!(manager.ingest_alert(&cpu_alert(&clock, 0.92)).unwrap().is_some());
}

#[test]
fn test_alert_after_resolution_opens_new_incident() {
    let (manager, clock) = manager();
    let first = manager.ingest_alert(&cpu_alert(&clock, 0.92)).unwrap().unwrap();
    manager.resolve(&first.id).unwrap();

    let second = manager.ingest_alert(&cpu_alert(&clock, 0.92)).unwrap().unwrap();

    assert_ne!(first.id, second.id);
}

#[test]
fn test_breaker_trip_opens_dependency_failure() {
    let (manager, _clock) = manager();

    let incident = manager
        .ingest_transition(&trip("legacy-erp", TransitionCause::FailureThreshold))
        .unwrap()
        .unwrap();

    assert_eq!(incident.kind, IncidentType::DependencyFailure);
    assert_eq!(incident.target.as_deref(), Some("legacy-erp"));
    assert_eq!(incident.origin, IncidentOrigin::Breaker);

    // Same dependency again is folded, as is a failed half-open trial while it is active
    assert!(manager
        .ingest_transition(&trip("legacy-erp", TransitionCause::FailureThreshold))
        .unwrap()
        .is_none());
    assert!(manager
        .ingest_transition(&trip("legacy-erp", TransitionCause::ProbeFailed))
        .unwrap()
        .is_none());
    assert_eq!(manager.active().len(), 1);
}

#[test]
fn test_breaker_reopen_after_resolution_opens_new_incident() {
    let (manager, _clock) = manager();
    let first = manager
        .ingest_transition(&trip("legacy-erp", TransitionCause::FailureThreshold))
        .unwrap()
        .unwrap();
    manager.resolve(&first.id).unwrap();

    let reopened = manager
        .ingest_transition(&trip("legacy-erp", TransitionCause::FailureAfterReset))
        .unwrap()
        .unwrap();

    assert_ne!(reopened.id, first.id);
    assert_eq!(reopened.kind, IncidentType::DependencyFailure);
    assert_eq!(reopened.target.as_deref(), Some("legacy-erp"));
}

#[test]
fn test_failed_trial_opens_incident_only_when_none_active() {
    let (manager, clock) = manager();
    let first = manager
        .ingest_transition(&trip("geo", TransitionCause::FailureThreshold))
        .unwrap()
        .unwrap();

    // Still active long after the dedup window: failed trials stay folded
    clock.advance(Duration::from_secs(60 * 60));
    assert!(manager
        .ingest_transition(&trip("geo", TransitionCause::ProbeFailed))
        .unwrap()
        .is_none());

    manager.resolve(&first.id).unwrap();
    let tracked = manager
        .ingest_transition(&trip("geo", TransitionCause::ProbeFailed))
        .unwrap()
        .unwrap();
    assert_eq!(tracked.target.as_deref(), Some("geo"));

    // Manual resets and half-open moves never open incidents
    let mut closing = trip("geo", TransitionCause::Manual);
    closing.to = CircuitState::Closed;
    assert!(manager.ingest_transition(&closing).unwrap().is_none());
}

#[test]
fn test_external_incident_needs_only_type_and_severity() {
    let (manager, _clock) = manager();

    let incident = manager
        .open_incident(IncidentType::SecurityEvent, Severity::Critical, None)
        .unwrap();

    assert_eq!(incident.origin, IncidentOrigin::External);
    assert_eq!(incident.status, IncidentStatus::Open);
}

#[test]
fn test_first_action_moves_to_in_progress() {
    let (manager, _clock) = manager();
    let incident = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();

    let updated = manager
        .record_response_action(&incident.id, "restart", ActionOutcome::Succeeded)
        .unwrap();

    assert_eq!(updated.status, IncidentStatus::InProgress);
    assert_eq!(updated.actions.len(), 1);
    assert_eq!(updated.actions[0].action, "restart");
}

#[test]
fn test_actions_are_kept_in_order() {
    let (manager, _clock) = manager();
    let incident = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();

    for step in ["isolate", "restart", "verify"] {
        manager
            .record_response_action(&incident.id, step, ActionOutcome::Succeeded)
            .unwrap();
    }

    let actions: Vec<String> = manager
        .get(&incident.id)
        .unwrap()
        .actions
        .into_iter()
        .map(|a| a.action)
        .collect();
    assert_eq!(actions, vec!["isolate", "restart", "verify"]);
}

#[test]
fn test_resolve_is_idempotent() {
    let (manager, _clock) = manager();
    let incident = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();

    let first = manager.resolve(&incident.id).unwrap();
    let second = manager.resolve(&incident.id).unwrap();

    assert_eq!(first.status, IncidentStatus::Resolved);
    assert_eq!(second.resolved_at, first.resolved_at);
    assert_eq!(manager.history_for(&incident.id).len(), 2);
}

#[test]
fn test_resolved_incident_rejects_changes() {
    let (manager, _clock) = manager();
    let incident = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();
    manager.resolve(&incident.id).unwrap();

    let action = manager.record_response_action(&incident.id, "late", ActionOutcome::Failed);
    assert!(matches!(action, Err(GuardError::InvalidTransition { .. })));

    let begin = manager.begin_response(&incident.id);
    assert!(matches!(begin, Err(GuardError::InvalidTransition { .. })));

    match manager.reopen(&incident.id) {
        Err(GuardError::InvalidTransition { from, to, .. }) => {
            assert_eq!(from, IncidentStatus::Resolved);
            assert_eq!(to, IncidentStatus::Open);
        }
        other => panic!("expected InvalidTransition, got {:?}", other.map(|i| i.id)),
    }
    assert!(manager.get(&incident.id).unwrap().actions.is_empty());
}

#[test]
fn test_unknown_incident_is_not_found() {
    let (manager, _clock) = manager();

    assert!(matches!(
        manager.resolve("missing"),
        Err(GuardError::IncidentNotFound(_))
    ));
}

#[test]
fn test_history_is_monotonic_and_ordered() {
    let (manager, _clock) = manager();
    let a = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();
    let b = manager
        .open_incident(IncidentType::SecurityEvent, Severity::High, None)
        .unwrap();
    manager.begin_response(&a.id).unwrap();
    manager.begin_response(&a.id).unwrap();
    manager.resolve(&b.id).unwrap();
    manager.resolve(&a.id).unwrap();

    let history = manager.history();
    let seqs: Vec<u64> = history.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);

    let a_path: Vec<IncidentStatus> = manager.history_for(&a.id).iter().map(|c| c.to).collect();
    assert_eq!(
        a_path,
        vec![
            IncidentStatus::Open,
            IncidentStatus::InProgress,
            IncidentStatus::Resolved
        ]
    );
    for change in history {
        if let Some(from) = change.from {
            assert!(change.to > from);
        }
    }
}

#[test]
fn test_oldest_active_skips_resolved() {
    let (manager, clock) = manager();
    let first = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();
    clock.advance(Duration::from_secs(1));
    let second = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();

    assert_eq!(manager.oldest_active().unwrap().id, first.id);
    manager.resolve(&first.id).unwrap();
    assert_eq!(manager.oldest_active().unwrap().id, second.id);
    assert_eq!(manager.active().len(), 1);
}

#[test]
fn test_state_is_rebuilt_from_journal() {
    let dir = tempdir().unwrap();
    let config = IncidentConfig {
        journal_path: Some(dir.path().join("incidents.jsonl")),
        ..Default::default()
    };

    let (open_id, resolved_id) = {
        let manager = IncidentManager::builder(config.clone()).build().unwrap();
        let open = manager
            .open_external(
                IncidentType::DependencyFailure,
                Severity::High,
                Some("ERP down".into()),
                Some("legacy-erp".into()),
            )
            .unwrap();
        manager
            .record_response_action(&open.id, "check_dependency", ActionOutcome::Failed)
            .unwrap();
        let resolved = manager
            .open_incident(IncidentType::Anomaly, Severity::Low, None)
            .unwrap();
        manager.resolve(&resolved.id).unwrap();
        (open.id, resolved.id)
    };

    let restored = IncidentManager::builder(config).build().unwrap();

    let open = restored.get(&open_id).unwrap();
    assert_eq!(open.status, IncidentStatus::InProgress);
    assert_eq!(open.title, "ERP down");
    assert_eq!(open.target.as_deref(), Some("legacy-erp"));
    assert_eq!(open.actions.len(), 1);
    assert_eq!(
        restored.get(&resolved_id).unwrap().status,
        IncidentStatus::Resolved
    );
    assert_eq!(restored.history().len(), 4);
    assert!(matches!(
        restored.reopen(&resolved_id),
        Err(GuardError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_opened_incidents_are_handed_on() {
    let (tx, mut rx) = mpsc::channel(8);
    let manager = IncidentManager::builder(IncidentConfig::default())
        .notify(tx)
        .build()
        .unwrap();

    let incident = manager
        .open_incident(IncidentType::SecurityEvent, Severity::Critical, None)
        .unwrap();

    assert_eq!(rx.recv().await.unwrap().id, incident.id);
}

#[test]
fn test_recorded_action_uses_manager_clock() {
    let (manager, clock) = manager();
    let incident = manager
        .open_incident(IncidentType::Anomaly, Severity::Low, None)
        .unwrap();
    clock.advance(Duration::from_secs(90));

    let updated = manager
        .record_action_with_detail(
            &incident.id,
            "isolate_host",
            ActionOutcome::Failed,
            Some("host unreachable".to_string()),
        )
        .unwrap();

    let action = &updated.actions[0];
    assert_eq!(action.timestamp, clock.now());
    assert_eq!(action.outcome, ActionOutcome::Failed);
    assert_eq!(action.detail.as_deref(), Some("host unreachable"));
    assert_eq!(updated.status, IncidentStatus::InProgress);
}

#[tokio::test]
async fn test_full_recovery_channel_still_delivers() {
    let (tx, mut rx) = mpsc::channel(1);
    let manager = IncidentManager::builder(IncidentConfig::default())
        .notify(tx)
        .build()
        .unwrap();

    let mut opened = Vec::new();
    for _ in 0..3 {
        let incident = manager
            .open_incident(IncidentType::Anomaly, Severity::Low, None)
            .unwrap();
        opened.push(incident.id);
    }

    let mut delivered = Vec::new();
    for _ in 0..3 {
        let incident = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        delivered.push(incident.id);
    }
    opened.sort();
    delivered.sort();
    assert_eq!(delivered, opened);
}

#[tokio::test]
async fn test_intake_loop_consumes_both_channels() {
    let (manager, clock) = manager();
    let (alert_tx, alert_rx) = mpsc::channel(8);
    let (transition_tx, transition_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(manager.clone().run(alert_rx, transition_rx, shutdown_rx));
    alert_tx.send(cpu_alert(&clock, 0.92)).await.unwrap();
    transition_tx
        .send(trip("legacy-erp", TransitionCause::FailureThreshold))
        .await
        .unwrap();

    for _ in 0..100 {
        if manager.list().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    let kinds: Vec<IncidentType> = manager.list().iter().map(|i| i.kind).collect();
    assert!(kinds.contains(&IncidentType::ResourceExhaustion));
    assert!(kinds.contains(&IncidentType::DependencyFailure));
}
