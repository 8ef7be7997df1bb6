// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::metrics::Metrics;
use outpost_adapters::FakeMetricsSink;
use outpost_core::{DeploymentId, DriftStatus, JobId, JobState};
use outpost_wire::{OperatorCommand, Pressure};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RecordingHandler {
    commands: Mutex<Vec<CommandKind>>,
}

impl CommandHandler for RecordingHandler {
    fn handle(&self, command: &CommandKind) -> Result<Vec<OutboundEvent>, EngineError> {
        self.commands.lock().push(command.clone());
        Ok(match command {
            CommandKind::Resync => vec![OutboundEvent::DriftNotification {
                deployment_id: DeploymentId::new("prod"),
                status: DriftStatus::InSync,
            }],
            _ => vec![],
        })
    }
}

struct Harness {
    publisher: Publisher,
    handler: Arc<RecordingHandler>,
    sink: FakeMetricsSink,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Harness {
    async fn stop(self) {
        self.shutdown.cancel();
        self.task.await.unwrap();
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        agent_id: "agent-1".to_string(),
        handshake_timeout: Duration::from_secs(1),
        reconnect: Backoff::new(Duration::from_millis(100), Duration::from_secs(1)),
        ..SessionConfig::default()
    }
}

fn start(config: SessionConfig, transport: &ChannelTransport) -> Harness {
    let sink = FakeMetricsSink::new();
    let metrics = Arc::new(Metrics::new(Arc::new(sink.clone())));
    let (publisher, outbound) = channel(config.fan_in_capacity, Arc::clone(&metrics));
    let handler = Arc::new(RecordingHandler::default());
    let session = StreamSession::new(
        config,
        outbound,
        Arc::new(transport.clone()),
        Arc::clone(&handler) as Arc<dyn CommandHandler>,
        metrics,
    );
    let shutdown = CancellationToken::new();
    let task = tokio::spawn(session.run(shutdown.clone()));
    Harness { publisher, handler, sink, shutdown, task }
}

fn status(n: u64) -> OutboundEvent {
    OutboundEvent::JobStatusDelta {
        job_id: JobId::new(format!("job-{n}")),
        state: JobState::Running,
        detail: None,
    }
}

async fn handshake(peer: &mut PeerEnd, watermark: u64) -> AgentFrame {
    let hello = peer.rx.recv().await.unwrap();
    peer.tx.send(ControlFrame::Welcome { watermark }).await.unwrap();
    hello
}

async fn recv_seqs(peer: &mut PeerEnd, count: usize) -> Vec<u64> {
    let mut seqs = Vec::new();
    for _ in 0..count {
        match peer.rx.recv().await.unwrap() {
            AgentFrame::Event { seq, .. } => seqs.push(seq),
            other => panic!("expected event, got {other:?}"),
        }
    }
    seqs
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn command(id: &str, command: CommandKind) -> ControlFrame {
    ControlFrame::Command(OperatorCommand { command_id: id.to_string(), command })
}

#[tokio::test(start_paused = true)]
async fn reconnect_replays_exactly_the_unacknowledged_events() {
    let transport = ChannelTransport::new();
    let mut peer = transport.peer();
    let h = start(config(), &transport);

    let hello = handshake(&mut peer, 0).await;
    assert_eq!(
        hello,
        AgentFrame::Hello { agent_id: "agent-1".to_string(), generation: 1, last_seq: 0 }
    );
    for n in 1..=5 {
        assert!(h.publisher.publish(status(n)).await);
    }
    assert_eq!(recv_seqs(&mut peer, 5).await, vec![1, 2, 3, 4, 5]);

    peer.tx.send(ControlFrame::Ack { watermark: 3 }).await.unwrap();
    let mut second = transport.peer();
    drop(peer);

    let hello = second.rx.recv().await.unwrap();
    assert_eq!(
        hello,
        AgentFrame::Hello { agent_id: "agent-1".to_string(), generation: 2, last_seq: 5 }
    );
    assert!(h.publisher.publish(status(6)).await);
    second.tx.send(ControlFrame::Welcome { watermark: 3 }).await.unwrap();

    assert_eq!(recv_seqs(&mut second, 3).await, vec![4, 5, 6]);
    settle().await;
    assert!(second.rx.try_recv().is_err());

    let health = h.publisher.health();
    assert!(health.connected);
    assert_eq!(health.generation, 2);
    assert_eq!(health.watermark, 3);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn events_published_while_disconnected_are_sent_after_handshake() {
    let transport = ChannelTransport::new();
    let h = start(config(), &transport);

    for n in 1..=3 {
        assert!(h.publisher.publish(status(n)).await);
    }
    settle().await;
    assert!(transport.dials() >= 1);
    assert!(!h.publisher.health().connected);

    let mut peer = transport.peer();
    handshake(&mut peer, 0).await;
    assert_eq!(recv_seqs(&mut peer, 3).await, vec![1, 2, 3]);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn handshake_timeout_discards_the_generation() {
    let transport = ChannelTransport::new();
    let mut silent = transport.peer();
    let h = start(config(), &transport);

    assert!(matches!(silent.rx.recv().await, Some(AgentFrame::Hello { generation: 1, .. })));
    let mut peer = transport.peer();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let hello = handshake(&mut peer, 0).await;
    assert!(matches!(hello, AgentFrame::Hello { generation: 1, .. }));
    assert_eq!(transport.dials(), 2);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn commands_apply_once_per_id() {
    let transport = ChannelTransport::new();
    let mut peer = transport.peer();
    let h = start(config(), &transport);
    handshake(&mut peer, 0).await;

    let cancel = CommandKind::CancelJob { job_id: JobId::new("job-1") };
    peer.tx.send(command("c-1", cancel.clone())).await.unwrap();
    peer.tx.send(command("c-1", cancel.clone())).await.unwrap();
    peer.tx.send(command("c-2", cancel.clone())).await.unwrap();
    settle().await;

    assert_eq!(*h.handler.commands.lock(), vec![cancel.clone(), cancel]);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn resync_events_are_streamed() {
    let transport = ChannelTransport::new();
    let mut peer = transport.peer();
    let h = start(config(), &transport);
    handshake(&mut peer, 0).await;

    peer.tx.send(command("r-1", CommandKind::Resync)).await.unwrap();
    match peer.rx.recv().await.unwrap() {
        AgentFrame::Event { seq: 1, event: OutboundEvent::DriftNotification { status, .. } } => {
            assert_eq!(status, DriftStatus::InSync)
        }
        other => panic!("unexpected frame {other:?}"),
    }
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn logs_are_dropped_above_high_water() {
    let transport = ChannelTransport::new();
    let mut peer = transport.peer();
    let h = start(
        SessionConfig { replay_capacity: 3, log_high_water: 2, ..config() },
        &transport,
    );
    handshake(&mut peer, 0).await;

    h.publisher.publish(status(1)).await;
    h.publisher.publish(status(2)).await;
    assert_eq!(recv_seqs(&mut peer, 2).await, vec![1, 2]);
    settle().await;
    assert_eq!(h.publisher.pressure(), Pressure::LogsPaused);

    let log = OutboundEvent::LogChunk { job_id: JobId::new("job-1"), bytes: b"x".to_vec() };
    assert!(!h.publisher.publish(log).await);
    assert_eq!(h.sink.counter(crate::metrics::LOG_CHUNKS_DROPPED), 1);

    peer.tx.send(ControlFrame::Ack { watermark: 2 }).await.unwrap();
    settle().await;
    assert_eq!(h.publisher.pressure(), Pressure::Normal);
    h.stop().await;
}

#[tokio::test(start_paused = true)]
async fn full_buffer_without_acks_restarts_the_generation() {
    let transport = ChannelTransport::new();
    let mut peer = transport.peer();
    let h = start(
        SessionConfig {
            replay_capacity: 2,
            log_high_water: 2,
            stall_timeout: Duration::from_secs(5),
            ..config()
        },
        &transport,
    );
    handshake(&mut peer, 0).await;
    h.publisher.publish(status(1)).await;
    h.publisher.publish(status(2)).await;
    assert_eq!(recv_seqs(&mut peer, 2).await, vec![1, 2]);
    settle().await;
    assert_eq!(h.publisher.pressure(), Pressure::Exceeded);

    let mut second = transport.peer();
    assert!(matches!(
        handshake(&mut second, 0).await,
        AgentFrame::Hello { generation: 2, last_seq: 2, .. }
    ));
    assert_eq!(recv_seqs(&mut second, 2).await, vec![1, 2]);
    assert!(peer.rx.recv().await.is_none());
    h.stop().await;
}
