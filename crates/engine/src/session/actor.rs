// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session task: handshake, transmit, replay, reconnect.

use super::{ChannelError, CommandHandler, Connection, Outbound, SessionConfig, SessionCore, Transport};
use crate::metrics::Metrics;
use outpost_wire::{AgentFrame, ControlFrame, OperatorCommand, OutboundEvent, Pressure};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

enum GenerationEnd {
    Shutdown,
    Lost(String),
    Stalled,
}

/// Bounded memory of applied command ids.
struct RecentIds {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), order: VecDeque::new(), seen: HashSet::new() }
    }

    /// Record `id`; false if it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

/// Owns the sequence counter and the replay buffer for the agent's single
/// control-plane stream.
pub struct StreamSession {
    config: SessionConfig,
    core: SessionCore,
    outbound: Outbound,
    transport: Arc<dyn Transport>,
    handler: Arc<dyn CommandHandler>,
    metrics: Arc<Metrics>,
    applied: RecentIds,
    fan_in_open: bool,
}

impl StreamSession {
    pub fn new(
        config: SessionConfig,
        outbound: Outbound,
        transport: Arc<dyn Transport>,
        handler: Arc<dyn CommandHandler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            core: SessionCore::new(config.replay_capacity, config.log_high_water),
            applied: RecentIds::new(config.dedup_capacity),
            config,
            outbound,
            transport,
            handler,
            metrics,
            fan_in_open: true,
        }
    }

    /// Run until `shutdown` fires, reconnecting with backoff.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            match self.open_generation(&shutdown).await {
                Ok(conn) => {
                    attempt = 0;
                    self.metrics.set_stream_connected(true);
                    let end = self.pump(conn, &shutdown).await;
                    self.metrics.set_stream_connected(false);
                    self.publish_health(false);
                    match end {
                        GenerationEnd::Shutdown => break,
                        GenerationEnd::Lost(reason) => tracing::warn!(
                            generation = self.core.generation(),
                            %reason,
                            "control-plane connection lost"
                        ),
                        GenerationEnd::Stalled => tracing::warn!(
                            generation = self.core.generation(),
                            buffered = self.core.buffered(),
                            "replay buffer full without acknowledgments, restarting generation"
                        ),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "control-plane connection failed");
                }
            }
            if shutdown.is_cancelled() {
                break;
            }
            let delay = self.config.reconnect.delay(attempt);
            attempt = attempt.saturating_add(1);
            if !self.idle(delay, &shutdown).await {
                break;
            }
        }
        tracing::info!(
            last_seq = self.core.last_seq(),
            watermark = self.core.watermark(),
            "stream session stopped"
        );
    }

    async fn open_generation(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<Connection, ChannelError> {
        let hello = AgentFrame::Hello {
            agent_id: self.config.agent_id.clone(),
            generation: self.core.generation() + 1,
            last_seq: self.core.last_seq(),
        };
        let transport = Arc::clone(&self.transport);
        let handshake = async move {
            let mut conn = transport.connect().await?;
            conn.tx.send(hello).await.map_err(|_| ChannelError::Closed)?;
            match conn.rx.recv().await {
                Some(ControlFrame::Welcome { watermark }) => Ok((conn, watermark)),
                Some(other) => {
                    Err(ChannelError::Handshake(format!("expected welcome, got {other:?}")))
                }
                None => Err(ChannelError::Closed),
            }
        };

        let (conn, peer_watermark) = tokio::select! {
            _ = shutdown.cancelled() => return Err(ChannelError::Closed),
            result = timeout(self.config.handshake_timeout, handshake) => {
                result.map_err(|_| ChannelError::Timeout)??
            }
        };

        if peer_watermark < self.core.watermark() {
            tracing::warn!(
                peer_watermark,
                local_watermark = self.core.watermark(),
                "peer is behind acknowledged events; resuming from local watermark"
            );
        }
        let generation = self.core.begin_generation(peer_watermark);
        tracing::info!(
            generation,
            watermark = self.core.watermark(),
            replay = self.core.unsent(),
            "control-plane session established"
        );
        Ok(conn)
    }

    async fn pump(&mut self, mut conn: Connection, shutdown: &CancellationToken) -> GenerationEnd {
        let mut full_since: Option<Instant> = None;
        loop {
            self.publish_health(true);
            let pressure = self.core.pressure();
            if pressure == Pressure::Exceeded {
                full_since.get_or_insert_with(Instant::now);
            } else {
                full_since = None;
            }
            let stall_at = full_since.map(|t| t + self.config.stall_timeout);
            let next = self.core.next_unsent().cloned();
            let can_drain = self.fan_in_open && pressure != Pressure::Exceeded;

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return GenerationEnd::Shutdown,
                frame = conn.rx.recv() => match frame {
                    Some(ControlFrame::Ack { watermark }) => {
                        self.core.ack(watermark);
                    }
                    Some(ControlFrame::Command(command)) => self.apply_command(command),
                    Some(ControlFrame::Welcome { .. }) => {
                        tracing::debug!("ignoring welcome inside an established generation");
                    }
                    None => return GenerationEnd::Lost("connection closed by peer".to_string()),
                },
                permit = conn.tx.reserve(), if next.is_some() => match (permit, next) {
                    (Ok(permit), Some(event)) => {
                        let seq = event.seq;
                        permit.send(AgentFrame::from(event));
                        self.core.mark_sent(seq);
                    }
                    (Ok(_), None) => {}
                    (Err(_), _) => return GenerationEnd::Lost("send pump closed".to_string()),
                },
                event = self.outbound.rx.recv(), if can_drain => self.accept(event),
                _ = sleep_until(stall_at.unwrap_or_else(Instant::now)), if stall_at.is_some() => {
                    return GenerationEnd::Stalled;
                }
            }
        }
    }

    /// Keep buffering producer events while disconnected. Returns false on
    /// shutdown.
    async fn idle(&mut self, delay: std::time::Duration, shutdown: &CancellationToken) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            self.publish_health(false);
            let can_drain = self.fan_in_open && self.core.pressure() != Pressure::Exceeded;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                _ = sleep_until(deadline) => return true,
                event = self.outbound.rx.recv(), if can_drain => self.accept(event),
            }
        }
    }

    fn accept(&mut self, event: Option<OutboundEvent>) {
        let Some(event) = event else {
            tracing::debug!("all publishers dropped");
            self.fan_in_open = false;
            return;
        };
        match self.core.enqueue(event) {
            Ok(_) => {}
            Err(ChannelError::LogsPaused) => self.metrics.log_chunk_dropped(),
            Err(e) => tracing::error!(error = %e, "event rejected by replay buffer"),
        }
    }

    fn apply_command(&mut self, command: OperatorCommand) {
        let OperatorCommand { command_id, command } = command;
        if !self.applied.insert(&command_id) {
            tracing::debug!(%command_id, "duplicate operator command ignored");
            return;
        }
        tracing::info!(%command_id, ?command, "applying operator command");
        match self.handler.handle(&command) {
            Ok(events) => {
                for event in events {
                    if let Err(e) = self.core.enqueue(event) {
                        tracing::warn!(%command_id, error = %e, "resync truncated");
                        break;
                    }
                }
            }
            Err(e) => tracing::warn!(%command_id, error = %e, "operator command failed"),
        }
    }

    fn publish_health(&self, connected: bool) {
        self.outbound.health.send_replace(self.core.health(connected));
    }
}
