// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane stream session.
//!
//! Producers hand events to a [`Publisher`]. A single [`StreamSession`] task
//! numbers them, keeps every unacknowledged event in a bounded replay buffer,
//! and transmits them in order over whatever [`Transport`] connection is
//! current:
//!
//! ```text
//! Publisher ──► fan-in queue ──► SessionCore (seq, replay buffer) ──► Connection.tx
//!                                      ▲                                  │
//!                                      └──── Ack / Welcome / Command ◄────┘
//! ```
//!
//! Each reconnect is a new generation: `Hello` → `Welcome{watermark}`, then
//! everything above the peer's watermark is replayed before live events.

mod actor;
mod sequencer;
mod publisher;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ChannelTransport, PeerEnd};

pub use sequencer::SessionCore;
pub use actor::StreamSession;
pub use publisher::{channel, Outbound, Publisher};

use crate::config::Backoff;
use crate::error::EngineError;
use async_trait::async_trait;
use outpost_wire::{AgentFrame, CommandKind, ControlFrame, OutboundEvent};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from the control-plane channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("replay buffer full ({capacity} unacknowledged events)")]
    BackpressureExceeded { capacity: usize },

    #[error("log chunk rejected above the replay high-water mark")]
    LogsPaused,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("handshake timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,
}

/// Stream session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub agent_id: String,
    /// Unacknowledged events retained for replay.
    pub replay_capacity: usize,
    /// Log chunks are only admitted while fewer events than this are buffered.
    pub log_high_water: usize,
    pub fan_in_capacity: usize,
    pub handshake_timeout: Duration,
    pub reconnect: Backoff,
    /// How long a full replay buffer may wait for acknowledgments before the
    /// generation is torn down and replayed.
    pub stall_timeout: Duration,
    /// Recently applied command ids remembered for deduplication.
    pub dedup_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agent_id: "outpost".to_string(),
            replay_capacity: 4096,
            log_high_water: 3072,
            fan_in_capacity: 256,
            handshake_timeout: Duration::from_secs(10),
            reconnect: Backoff::new(Duration::from_millis(500), Duration::from_secs(30)),
            stall_timeout: Duration::from_secs(30),
            dedup_capacity: 1024,
        }
    }
}

/// One open connection to the control plane. Dropping it closes the
/// generation.
pub struct Connection {
    pub tx: mpsc::Sender<AgentFrame>,
    pub rx: mpsc::Receiver<ControlFrame>,
}

/// Dials the control plane.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, ChannelError>;
}

/// Applies operator commands received over the stream.
///
/// Called inline by the session task, so implementations must not wait on
/// anything that could itself be waiting on the session. Returned events
/// (used by `Resync`) are queued directly into the replay buffer.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, command: &CommandKind) -> Result<Vec<OutboundEvent>, EngineError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
