// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::{config, settle, TestEngine};
use outpost_adapters::{BackendCall, CancelBehavior, SecretCall};
use outpost_core::test_support::{apply_request, plan_request};
use outpost_core::{FailureReason, JobFilter};
use outpost_wire::{OutboundEvent, Pressure};
use proptest::prelude::*;

fn submit(engine: &TestEngine, id: &str) -> JobId {
    engine.scheduler.submit(apply_request(id)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn single_token_queues_second_job_until_first_finishes() {
    let mut engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    let b = submit(&engine, "job-b");
    settle().await;

    assert_eq!(engine.state(&a), JobState::Running);
    assert_eq!(engine.state(&b), JobState::Queued);
    assert_eq!(engine.scheduler.stats().queued, 1);
    assert_eq!(engine.backend.submitted(), vec![a.clone()]);

    assert!(engine.backend.finish(&a, 0));
    settle().await;

    assert_eq!(engine.state(&a), JobState::Succeeded);
    assert_eq!(engine.state(&b), JobState::Running);
    assert_eq!(engine.backend.submitted(), vec![a.clone(), b.clone()]);
    assert_eq!(
        engine.registry.get(&b).unwrap().state_path(),
        vec![JobState::Pending, JobState::Validated, JobState::Queued, JobState::Running]
    );

    let events = engine.drain_events();
    assert_eq!(
        TestEngine::published_states(&events, &a),
        vec![JobState::Validated, JobState::Running, JobState::Succeeded]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_a_queued_job_never_touches_the_backend() {
    let engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    let b = submit(&engine, "job-b");
    settle().await;

    assert_eq!(engine.scheduler.cancel(&b).await.unwrap(), CancelOutcome::Cancelled);
    let job = engine.registry.get(&b).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!job.holds_token);
    assert!(!job.state_path().contains(&JobState::Running));
    assert_eq!(engine.backend.submitted(), vec![a]);
    assert_eq!(engine.scheduler.stats().tokens_available, 0);
    assert_eq!(engine.scheduler.stats().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn exit_codes_map_to_terminal_states() {
    let engine = TestEngine::start(config(3));
    let clean = submit(&engine, "job-clean");
    let changed = submit(&engine, "job-changed");
    let broken = submit(&engine, "job-broken");
    settle().await;

    engine.backend.finish(&clean, 0);
    engine.backend.finish(&changed, 2);
    engine.backend.finish(&broken, 1);
    settle().await;

    let changed = engine.registry.get(&changed).unwrap();
    assert_eq!(changed.state, JobState::Succeeded);
    assert_eq!(changed.result.map(|r| r.exit), Some(ExitClass::Changed));
    assert_eq!(engine.state(&clean), JobState::Succeeded);

    let broken = engine.registry.get(&broken).unwrap();
    assert_eq!(broken.state, JobState::Failed);
    assert_eq!(broken.failure, Some(FailureReason::Execution("exit code 1".into())));
    assert!(!broken.holds_token);

    assert_eq!(engine.scheduler.stats().tokens_available, 3);
    assert_eq!(engine.metrics.snapshot().jobs_succeeded, 2);
    assert_eq!(engine.metrics.snapshot().jobs_failed, 1);
    assert_eq!(engine.sink.spans().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_fails_and_frees_the_token() {
    let engine = TestEngine::start(config(1));
    engine.backend.fail_next_submit("quota exceeded");
    let a = submit(&engine, "job-a");
    let b = submit(&engine, "job-b");
    settle().await;

    let failed = engine.registry.get(&a).unwrap();
    assert_eq!(failed.state, JobState::Failed);
    assert!(matches!(failed.failure, Some(FailureReason::BackendSubmitError(ref m)) if m.contains("quota")));
    assert_eq!(engine.state(&b), JobState::Running);
}

#[tokio::test(start_paused = true)]
async fn hung_submission_times_out() {
    let engine = TestEngine::start(EngineConfig {
        submit_timeout: Duration::from_secs(5),
        ..config(1)
    });
    engine.backend.set_hang_submit(true);
    let a = submit(&engine, "job-a");
    settle().await;
    assert_eq!(engine.state(&a), JobState::Running);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(matches!(job.failure, Some(FailureReason::BackendSubmitError(_))));
    assert_eq!(engine.scheduler.stats().tokens_available, 1);
}

#[tokio::test(start_paused = true)]
async fn missing_credentials_fail_plan_jobs() {
    let engine = TestEngine::start(config(1));
    engine.secrets.remove_credentials(&DeploymentId::new("prod"));
    let id = engine.scheduler.submit(plan_request("prod")).unwrap();
    settle().await;

    let job = engine.registry.get(&id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(engine.backend.submitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn plan_jobs_carry_a_leased_credential() {
    let engine = TestEngine::start(config(1));
    let id = engine.scheduler.submit(plan_request("prod")).unwrap();
    settle().await;

    let job = engine.registry.get(&id).unwrap();
    let credential = job.credential.clone().unwrap();
    assert!(engine
        .secrets
        .calls()
        .contains(&SecretCall::Lease { deployment: DeploymentId::new("prod") }));
    assert!(engine
        .backend
        .calls()
        .contains(&BackendCall::Submit { job_id: id, credential: Some(credential) }));
}

#[tokio::test(start_paused = true)]
async fn cancel_running_job_waits_for_backend() {
    let engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    settle().await;

    assert_eq!(engine.scheduler.cancel(&a).await.unwrap(), CancelOutcome::Requested);
    assert_eq!(engine.scheduler.cancel(&a).await.unwrap(), CancelOutcome::Requested);
    settle().await;

    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!job.forced_cancel);
    let cancels = engine.backend.calls().iter().filter(|c| matches!(c, BackendCall::Cancel { .. })).count();
    assert_eq!(cancels, 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_cancel_is_forced_after_grace() {
    let engine = TestEngine::start(EngineConfig {
        cancel_grace: Duration::from_secs(10),
        ..config(1)
    });
    engine.backend.set_cancel_behavior(CancelBehavior::Hang);
    let a = submit(&engine, "job-a");
    settle().await;

    engine.scheduler.cancel(&a).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.state(&a), JobState::Running);

    tokio::time::sleep(Duration::from_secs(6)).await;
    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.forced_cancel);
    assert_eq!(engine.scheduler.stats().tokens_available, 1);
}

#[tokio::test(start_paused = true)]
async fn workload_killed_during_cancel_grace_ends_cancelled() {
    let engine = TestEngine::start(EngineConfig {
        cancel_grace: Duration::from_secs(10),
        ..config(1)
    });
    engine.backend.set_cancel_behavior(CancelBehavior::Hang);
    let a = submit(&engine, "job-a");
    settle().await;

    assert_eq!(engine.scheduler.cancel(&a).await.unwrap(), CancelOutcome::Requested);
    engine.clock.advance(Duration::from_secs(2));
    assert!(engine.backend.finish(&a, 137));
    settle().await;

    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!job.forced_cancel);
    assert!(job.failure.is_none());
    assert_eq!(job.result.as_ref().map(|r| r.exit), Some(ExitClass::Error));
    assert_eq!(job.transitioned_at_ms, engine.clock.epoch_ms());
    assert_eq!(engine.sink.counter(crate::metrics::JOBS_CANCELLED), 1);
    assert_eq!(engine.sink.counter(crate::metrics::JOBS_FAILED), 0);
    assert_eq!(engine.scheduler.stats().tokens_available, 1);

    // The grace timer firing later changes nothing
    tokio::time::sleep(Duration::from_secs(11)).await;
    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Cancelled);
    assert!(!job.forced_cancel);
}

#[tokio::test(start_paused = true)]
async fn failed_cancel_is_forced_immediately() {
    let engine = TestEngine::start(config(1));
    engine.backend.set_cancel_behavior(CancelBehavior::Fail);
    let a = submit(&engine, "job-a");
    settle().await;

    engine.scheduler.cancel(&a).await.unwrap();
    settle().await;
    assert!(engine.registry.get(&a).unwrap().forced_cancel);
}

#[tokio::test(start_paused = true)]
async fn cancel_before_handle_is_issued_once_handle_arrives() {
    let engine = TestEngine::start(config(1));
    engine.backend.set_submit_delay(Duration::from_secs(3));
    let a = submit(&engine, "job-a");
    settle().await;

    assert_eq!(engine.scheduler.cancel(&a).await.unwrap(), CancelOutcome::Requested);
    assert_eq!(engine.state(&a), JobState::Running);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(engine.state(&a), JobState::Cancelled);
    assert!(engine.backend.calls().iter().any(|c| matches!(c, BackendCall::Cancel { .. })));
}

#[tokio::test(start_paused = true)]
async fn cancel_of_terminal_job_is_rejected() {
    let engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    settle().await;
    engine.backend.finish(&a, 0);
    settle().await;

    assert!(matches!(
        engine.scheduler.cancel(&a).await,
        Err(EngineError::AlreadyTerminal { state: JobState::Succeeded, .. })
    ));
    assert!(matches!(
        engine.scheduler.cancel(&JobId::new("job-missing")).await,
        Err(EngineError::JobNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn lost_watch_stream_fails_the_job() {
    let engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    settle().await;
    engine.backend.lose(&a);
    settle().await;

    let job = engine.registry.get(&a).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(matches!(job.failure, Some(FailureReason::BackendLost(_))));
}

#[tokio::test(start_paused = true)]
async fn queue_ceiling_rejects_fast() {
    let engine = TestEngine::start(EngineConfig { queue_ceiling: 1, ..config(1) });
    submit(&engine, "job-a");
    settle().await;
    submit(&engine, "job-b");

    let err = engine.scheduler.submit(apply_request("job-c")).unwrap_err();
    assert_eq!(err, EngineError::QueueFull { ceiling: 1 });
    assert!(!engine.registry.contains(&JobId::new("job-c")));
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_never_reach_the_registry() {
    let engine = TestEngine::start(config(1));
    let err = engine.scheduler.submit(JobRequest::new("apply", vec![])).unwrap_err();
    assert!(matches!(err, EngineError::InvalidSpec(_)));
    assert!(engine.registry.is_empty());
    assert_eq!(engine.scheduler.stats().waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_rejected() {
    let engine = TestEngine::start(config(1));
    submit(&engine, "job-a");
    assert_eq!(
        engine.scheduler.submit(apply_request("job-a")).unwrap_err(),
        EngineError::DuplicateId(JobId::new("job-a"))
    );
    assert_eq!(engine.scheduler.stats().waiting, 1);
}

#[tokio::test(start_paused = true)]
async fn progress_updates_detail_and_logs_are_forwarded() {
    let mut engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    settle().await;
    engine.drain_events();

    engine.backend.phase(&a, "running on node-3");
    engine.backend.log(&a, b"Plan: 1 to add\n");
    settle().await;

    assert_eq!(engine.registry.get(&a).unwrap().detail.as_deref(), Some("running on node-3"));
    assert_eq!(engine.state(&a), JobState::Running);
    let events = engine.drain_events();
    assert!(events.contains(&OutboundEvent::LogChunk {
        job_id: a.clone(),
        bytes: b"Plan: 1 to add\n".to_vec()
    }));
}

#[tokio::test(start_paused = true)]
async fn logs_are_dropped_under_pressure_but_status_is_not() {
    let mut engine = TestEngine::start(config(1));
    let a = submit(&engine, "job-a");
    settle().await;
    engine.drain_events();

    engine.set_pressure(Pressure::LogsPaused);
    engine.backend.log(&a, b"noisy");
    engine.backend.finish(&a, 0);
    settle().await;

    let events = engine.drain_events();
    assert!(!events.iter().any(|e| matches!(e, OutboundEvent::LogChunk { .. })));
    assert_eq!(TestEngine::published_states(&events, &a), vec![JobState::Succeeded]);
    assert_eq!(engine.metrics.snapshot().log_chunks_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn observers_hear_about_terminal_jobs() {
    let engine = TestEngine::start(config(1));
    let mut notices = engine.scheduler.subscribe();
    let id = engine.scheduler.submit(plan_request("prod")).unwrap();
    settle().await;
    engine.backend.finish(&id, 2);
    settle().await;

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.job_id, id);
    assert_eq!(notice.kind, JobKind::PlanOnly);
    assert_eq!(notice.deployment, Some(DeploymentId::new("prod")));
    assert_eq!(notice.exit, Some(ExitClass::Changed));
    assert!(notice.credential.is_some());
}

#[derive(Debug, Clone)]
enum Step {
    Submit,
    Finish(usize, i32),
    Cancel(usize),
    Lose(usize),
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Submit),
        3 => (0usize..12, prop_oneof![Just(0), Just(1), Just(2)]).prop_map(|(i, c)| Step::Finish(i, c)),
        1 => (0usize..12).prop_map(Step::Cancel),
        1 => (0usize..12).prop_map(Step::Lose),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn concurrency_limit_and_state_paths_hold(
        concurrency in 1usize..4,
        steps in proptest::collection::vec(arb_step(), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async move {
            let engine = TestEngine::start(config(concurrency));
            let mut ids: Vec<JobId> = Vec::new();

            for step in steps {
                match step {
                    Step::Submit => {
                        let id = JobId::new(format!("job-{}", ids.len()));
                        engine.scheduler.submit(apply_request(id.as_str())).unwrap();
                        ids.push(id);
                    }
                    Step::Finish(i, code) => {
                        if let Some(id) = ids.get(i) {
                            engine.backend.finish(id, code);
                        }
                    }
                    Step::Cancel(i) => {
                        if let Some(id) = ids.get(i) {
                            let _ = engine.scheduler.cancel(id).await;
                        }
                    }
                    Step::Lose(i) => {
                        if let Some(id) = ids.get(i) {
                            engine.backend.lose(id);
                        }
                    }
                }
                settle().await;

                let running = engine.registry.count(&JobFilter::all().states(vec![JobState::Running]));
                assert!(running <= concurrency, "{running} running with {concurrency} tokens");
                assert_eq!(engine.scheduler.stats().tokens_available, concurrency - running);
            }

            for job in engine.registry.list(&JobFilter::all()) {
                for pair in job.state_path().windows(2) {
                    assert!(pair[0].can_transition_to(pair[1]), "{:?}", job.state_path());
                }
                assert_eq!(job.holds_token, job.state == JobState::Running);
            }
        });
    }
}
