// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory control plane for tests.

use super::{ChannelError, Connection, Transport};
use async_trait::async_trait;
use outpost_wire::{AgentFrame, ControlFrame};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// The control plane's end of one connection.
pub struct PeerEnd {
    pub rx: mpsc::Receiver<AgentFrame>,
    pub tx: mpsc::Sender<ControlFrame>,
}

/// Transport that hands out pre-arranged in-memory connections, one per
/// dial. Dials with nothing arranged fail.
#[derive(Clone, Default)]
pub struct ChannelTransport {
    pending: Arc<Mutex<VecDeque<Connection>>>,
    dials: Arc<AtomicUsize>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange the connection returned by the next successful dial.
    pub fn peer(&self) -> PeerEnd {
        let (agent_tx, agent_rx) = mpsc::channel(64);
        let (control_tx, control_rx) = mpsc::channel(64);
        self.pending.lock().push_back(Connection { tx: agent_tx, rx: control_rx });
        PeerEnd { rx: agent_rx, tx: control_tx }
    }

    /// Number of dial attempts so far, successful or not.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<Connection, ChannelError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.pending
            .lock()
            .pop_front()
            .ok_or_else(|| ChannelError::Connect("control plane unreachable".to_string()))
    }
}
