// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use outpost_core::{DeploymentId, DriftStatus, JobId, JobState};
use proptest::prelude::*;

fn status(n: u64) -> OutboundEvent {
    OutboundEvent::JobStatusDelta {
        job_id: JobId::new(format!("job-{n}")),
        state: JobState::Running,
        detail: None,
    }
}

fn log() -> OutboundEvent {
    OutboundEvent::LogChunk { job_id: JobId::new("job-1"), bytes: b"line\n".to_vec() }
}

/// Send everything currently unsent, returning the sequence numbers.
fn drain(core: &mut SessionCore) -> Vec<u64> {
    let mut sent = Vec::new();
    while let Some(event) = core.next_unsent() {
        let seq = event.seq;
        core.mark_sent(seq);
        sent.push(seq);
    }
    sent
}

#[test]
fn sequence_numbers_start_at_one_and_increase() {
    let mut core = SessionCore::new(8, 8);
    assert_eq!(core.enqueue(status(1)).unwrap(), 1);
    assert_eq!(core.enqueue(status(2)).unwrap(), 2);
    assert_eq!(core.last_seq(), 2);
}

#[test]
fn ack_discards_and_never_regresses() {
    let mut core = SessionCore::new(8, 8);
    for n in 1..=5 {
        core.enqueue(status(n)).unwrap();
    }
    drain(&mut core);

    assert_eq!(core.ack(3), 3);
    assert_eq!(core.buffered(), 2);
    assert_eq!(core.ack(1), 3);
    assert_eq!(core.buffered(), 2);
}

#[test]
fn ack_is_clamped_to_last_sent() {
    let mut core = SessionCore::new(8, 8);
    for n in 1..=4 {
        core.enqueue(status(n)).unwrap();
    }
    core.mark_sent(1);
    core.mark_sent(2);
    assert_eq!(core.ack(10), 2);
    assert_eq!(core.next_unsent().map(|e| e.seq), Some(3));
}

#[test]
fn new_generation_replays_above_peer_watermark() {
    let mut core = SessionCore::new(8, 8);
    for n in 1..=5 {
        core.enqueue(status(n)).unwrap();
    }
    core.begin_generation(0);
    assert_eq!(drain(&mut core), vec![1, 2, 3, 4, 5]);
    core.ack(3);

    assert_eq!(core.begin_generation(3), 2);
    core.enqueue(status(6)).unwrap();
    assert_eq!(drain(&mut core), vec![4, 5, 6]);
}

#[test]
fn peer_watermark_ahead_of_local_acks() {
    let mut core = SessionCore::new(8, 8);
    for n in 1..=5 {
        core.enqueue(status(n)).unwrap();
    }
    core.begin_generation(0);
    drain(&mut core);

    core.begin_generation(4);
    assert_eq!(core.watermark(), 4);
    assert_eq!(drain(&mut core), vec![5]);
}

#[test]
fn full_buffer_rejects_and_reports_pressure() {
    let mut core = SessionCore::new(3, 2);
    core.enqueue(status(1)).unwrap();
    assert_eq!(core.pressure(), Pressure::Normal);
    core.enqueue(log()).unwrap();
    assert_eq!(core.pressure(), Pressure::LogsPaused);
    assert_eq!(core.enqueue(log()).unwrap_err(), ChannelError::LogsPaused);
    core.enqueue(status(3)).unwrap();
    assert_eq!(core.pressure(), Pressure::Exceeded);
    assert_eq!(
        core.enqueue(status(4)).unwrap_err(),
        ChannelError::BackpressureExceeded { capacity: 3 }
    );
    assert_eq!(core.last_seq(), 3);
}

#[test]
fn health_reflects_counters() {
    let mut core = SessionCore::new(4, 4);
    core.enqueue(OutboundEvent::DriftNotification {
        deployment_id: DeploymentId::new("prod"),
        status: DriftStatus::Drifted,
    })
    .unwrap();
    core.begin_generation(0);
    let health = core.health(true);
    assert!(health.connected);
    assert_eq!(health.generation, 1);
    assert_eq!(health.next_seq, 2);
    assert_eq!(health.buffered, 1);
}

#[derive(Debug, Clone)]
enum Op {
    Publish,
    Send(usize),
    Ack(u64),
    Reconnect(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Publish),
        3 => (1usize..4).prop_map(Op::Send),
        2 => (0u64..40).prop_map(Op::Ack),
        1 => (0u64..40).prop_map(Op::Reconnect),
    ]
}

proptest! {
    #[test]
    fn replay_sends_each_unacked_event_once_per_generation(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let mut core = SessionCore::new(64, 64);
        core.begin_generation(0);
        let mut sent_this_generation: Vec<u64> = Vec::new();
        let mut n = 0;

        for op in ops {
            match op {
                Op::Publish => {
                    n += 1;
                    let _ = core.enqueue(status(n));
                }
                Op::Send(count) => {
                    for _ in 0..count {
                        let Some(event) = core.next_unsent() else { break };
                        let seq = event.seq;
                        prop_assert!(seq > core.watermark(), "acknowledged event {} resent", seq);
                        prop_assert!(!sent_this_generation.contains(&seq), "event {} sent twice", seq);
                        if let Some(last) = sent_this_generation.last() {
                            prop_assert!(seq > *last);
                        }
                        core.mark_sent(seq);
                        sent_this_generation.push(seq);
                    }
                }
                Op::Ack(wm) => {
                    let before = core.watermark();
                    let after = core.ack(wm);
                    prop_assert!(after >= before);
                }
                Op::Reconnect(peer) => {
                    let before = core.watermark();
                    core.begin_generation(peer);
                    prop_assert!(core.watermark() >= before);
                    sent_this_generation.clear();
                }
            }
            prop_assert_eq!(core.buffered() as u64, core.last_seq() - core.watermark());
        }
    }
}
