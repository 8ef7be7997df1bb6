// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::EngineConfig;
use crate::metrics;
use crate::test_helpers::{config, settle, TestEngine};
use outpost_core::test_support::{apply_request, deployment_spec, plan_request};
use outpost_wire::OutboundEvent;

const MINUTE: Duration = Duration::from_secs(60);

fn drift_config() -> DriftConfig {
    DriftConfig { jitter: Duration::ZERO, check_timeout: Duration::from_secs(300) }
}

fn start(engine: &TestEngine, cfg: DriftConfig) -> DriftLoop<outpost_core::FakeClock> {
    DriftLoop::start(
        engine.scheduler.clone(),
        engine.publisher.clone(),
        Arc::clone(&engine.metrics),
        cfg,
        SpecLimits::default(),
        engine.shutdown.clone(),
    )
}

fn prod() -> DeploymentId {
    DeploymentId::new("prod")
}

fn notifications(events: &[OutboundEvent]) -> Vec<DriftStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::DriftNotification { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

/// Sleep past the next tick and let the submission land.
async fn advance(by: Duration) {
    tokio::time::sleep(by).await;
    settle().await;
}

fn in_flight(drift: &DriftLoop<outpost_core::FakeClock>) -> JobId {
    drift.status(&prod()).unwrap().in_flight.unwrap_or_else(|| panic!("no check in flight"))
}

#[tokio::test(start_paused = true)]
async fn ticks_during_a_running_check_are_skipped() {
    let mut engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    advance(MINUTE).await;
    let check = in_flight(&drift);
    assert_eq!(engine.state(&check), JobState::Running);

    advance(Duration::from_secs(10)).await;
    drift.check_now(&prod()).unwrap();
    settle().await;
    advance(MINUTE).await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.checks_started, 1);
    assert_eq!(record.in_flight, Some(check.clone()));
    assert_eq!(engine.backend.submitted(), vec![check.clone()]);

    engine.backend.finish(&check, 2);
    settle().await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.status, DriftStatus::Drifted);
    assert_eq!(record.last_conclusive, DriftStatus::Drifted);
    assert!(record.in_flight.is_none());
    assert!(record.credential.is_some());
    assert_eq!(engine.sink.counter(metrics::DRIFT_DETECTED), 1);
    assert_eq!(notifications(&engine.drain_events()), vec![DriftStatus::Drifted]);
}

#[tokio::test(start_paused = true)]
async fn reaped_check_lease_is_no_longer_reported() {
    let engine = TestEngine::start(config(2));
    let _reaper = crate::reaper::Reaper::start(
        Arc::clone(&engine.registry),
        Arc::new(engine.backend.clone()),
        Arc::new(engine.secrets.clone()),
        crate::config::ReaperConfig { grace: MINUTE, ..Default::default() },
        engine.scheduler.subscribe(),
        engine.shutdown.clone(),
    );
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", Duration::from_secs(3600))).unwrap();

    drift.check_now(&prod()).unwrap();
    settle().await;
    let check = in_flight(&drift);
    engine.backend.finish(&check, 0);
    settle().await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.status, DriftStatus::InSync);
    assert!(record.credential.is_some());
    assert_eq!(engine.secrets.active_leases(), 1);

    advance(MINUTE).await;
    settle().await;
    assert_eq!(engine.secrets.active_leases(), 0);
    assert!(engine.registry.get(&check).is_err());
    assert!(drift.status(&prod()).unwrap().credential.is_none());
    assert!(drift.list()[0].credential.is_none());
    assert_eq!(drift.status(&prod()).unwrap().status, DriftStatus::InSync);
}

#[tokio::test(start_paused = true)]
async fn failed_check_keeps_last_conclusive_verdict() {
    let engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    advance(MINUTE).await;
    engine.backend.finish(&in_flight(&drift), 0);
    settle().await;
    assert_eq!(drift.status(&prod()).unwrap().status, DriftStatus::InSync);

    advance(MINUTE).await;
    engine.backend.finish(&in_flight(&drift), 1);
    settle().await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.status, DriftStatus::CheckFailed);
    assert_eq!(record.last_conclusive, DriftStatus::InSync);
    assert_eq!(record.checks_started, 2);
}

#[tokio::test(start_paused = true)]
async fn notifications_follow_status_changes_and_every_drift() {
    let mut engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    for code in [0, 0, 2, 2, 0] {
        advance(MINUTE).await;
        engine.backend.finish(&in_flight(&drift), code);
        settle().await;
    }

    assert_eq!(
        notifications(&engine.drain_events()),
        vec![DriftStatus::InSync, DriftStatus::Drifted, DriftStatus::Drifted, DriftStatus::InSync]
    );
    assert_eq!(engine.sink.counter(metrics::DRIFT_DETECTED), 2);
}

#[tokio::test(start_paused = true)]
async fn hung_check_is_cancelled_and_marked_failed() {
    let engine = TestEngine::start(config(2));
    let cfg = DriftConfig { check_timeout: Duration::from_secs(30), ..drift_config() };
    let drift = start(&engine, cfg);
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    advance(MINUTE).await;
    let check = in_flight(&drift);

    advance(Duration::from_secs(31)).await;
    settle().await;

    assert_eq!(engine.state(&check), JobState::Cancelled);
    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.status, DriftStatus::CheckFailed);
    assert!(record.in_flight.is_none());
}

#[tokio::test(start_paused = true)]
async fn operator_plan_jobs_do_not_change_drift_status() {
    let engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    let manual = engine.scheduler.submit(plan_request("prod")).unwrap();
    settle().await;
    engine.backend.finish(&manual, 2);
    settle().await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.status, DriftStatus::Unknown);
    assert_eq!(record.checks_started, 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_check_is_retried_on_next_tick() {
    let engine = TestEngine::start(EngineConfig { queue_ceiling: 1, ..config(1) });
    let drift = start(&engine, drift_config());
    let busy = engine.scheduler.submit(apply_request("job-busy")).unwrap();
    settle().await;
    let _queued = engine.scheduler.submit(apply_request("job-queued")).unwrap();
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    advance(MINUTE).await;
    assert_eq!(drift.status(&prod()).unwrap().checks_started, 0);

    engine.backend.finish(&busy, 0);
    settle().await;
    advance(MINUTE).await;

    let record = drift.status(&prod()).unwrap();
    assert_eq!(record.checks_started, 1);
    assert!(record.in_flight.is_some());
}

#[tokio::test(start_paused = true)]
async fn removed_deployment_stops_ticking() {
    let engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();

    advance(MINUTE).await;
    let check = in_flight(&drift);
    let removed = drift.remove(&prod()).unwrap();
    assert_eq!(removed.in_flight, Some(check.clone()));

    engine.backend.finish(&check, 0);
    advance(MINUTE * 3).await;

    assert_eq!(engine.backend.submitted(), vec![check]);
    assert!(drift.is_empty());
    assert!(matches!(drift.status(&prod()), Err(EngineError::DeploymentNotFound(_))));
    assert!(matches!(drift.remove(&prod()), Err(EngineError::DeploymentNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn interval_update_applies_from_next_tick() {
    let engine = TestEngine::start(config(2));
    let drift = start(&engine, drift_config());
    drift.register(deployment_spec("prod", MINUTE)).unwrap();
    settle().await;

    let updated = drift.update_interval(&prod(), Duration::from_secs(10)).unwrap();
    assert_eq!(updated.interval, Duration::from_secs(10));

    advance(Duration::from_secs(30)).await;
    assert_eq!(drift.status(&prod()).unwrap().checks_started, 0);

    advance(Duration::from_secs(30)).await;
    engine.backend.finish(&in_flight(&drift), 0);
    settle().await;
    advance(Duration::from_secs(10)).await;
    assert_eq!(drift.status(&prod()).unwrap().checks_started, 2);
}

#[tokio::test(start_paused = true)]
async fn registration_is_validated() {
    let engine = TestEngine::start(config(1));
    let drift = start(&engine, drift_config());

    drift.register(deployment_spec("prod", MINUTE)).unwrap();
    assert!(matches!(
        drift.register(deployment_spec("prod", MINUTE)),
        Err(EngineError::DuplicateDeployment(_))
    ));
    assert!(matches!(
        drift.register(deployment_spec("zero", Duration::ZERO)),
        Err(EngineError::InvalidSpec(ValidationError::ZeroInterval))
    ));
    assert!(matches!(
        drift.update_interval(&prod(), Duration::ZERO),
        Err(EngineError::InvalidSpec(ValidationError::ZeroInterval))
    ));
    assert!(matches!(
        drift.check_now(&DeploymentId::new("missing")),
        Err(EngineError::DeploymentNotFound(_))
    ));

    drift.register(deployment_spec("dev", MINUTE)).unwrap();
    let ids: Vec<String> = drift.list().into_iter().map(|d| d.id.to_string()).collect();
    assert_eq!(ids, vec!["dev", "prod"]);
}

#[test]
fn jitter_stays_within_bounds() {
    let interval = Duration::from_secs(60);
    let jitter = Duration::from_secs(5);
    for _ in 0..200 {
        let delay = jittered(interval, jitter);
        assert!(delay >= interval - jitter && delay <= interval + jitter, "{delay:?}");
    }
    assert_eq!(jittered(interval, Duration::ZERO), interval);
    assert!(jittered(Duration::from_millis(1), jitter) >= Duration::from_millis(1));
}
