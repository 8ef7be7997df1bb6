// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Producer side of the stream session.

use crate::metrics::Metrics;
use outpost_wire::{OutboundEvent, Pressure, StreamHealth};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Cloneable handle producers publish through.
///
/// Status and drift events wait for room in the fan-in queue. Log chunks
/// never wait: they are dropped and counted while the session reports
/// pressure or the queue is full.
#[derive(Clone)]
pub struct Publisher {
    tx: mpsc::Sender<OutboundEvent>,
    health: watch::Receiver<StreamHealth>,
    metrics: Arc<Metrics>,
}

/// Session side of the fan-in queue.
pub struct Outbound {
    pub(crate) rx: mpsc::Receiver<OutboundEvent>,
    pub(crate) health: watch::Sender<StreamHealth>,
}

/// Create a connected publisher/outbound pair.
pub fn channel(capacity: usize, metrics: Arc<Metrics>) -> (Publisher, Outbound) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (health_tx, health_rx) = watch::channel(StreamHealth::default());
    (Publisher { tx, health: health_rx, metrics }, Outbound { rx, health: health_tx })
}

impl Publisher {
    /// Publish one event. Returns whether it was accepted.
    pub async fn publish(&self, event: OutboundEvent) -> bool {
        if event.is_droppable() {
            return self.publish_log(event);
        }
        let name = event.name();
        if self.tx.send(event).await.is_err() {
            tracing::debug!(event = name, "stream session gone, event discarded");
            return false;
        }
        true
    }

    fn publish_log(&self, event: OutboundEvent) -> bool {
        if self.pressure() != Pressure::Normal {
            self.metrics.log_chunk_dropped();
            return false;
        }
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.log_chunk_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn pressure(&self) -> Pressure {
        self.health.borrow().pressure
    }

    pub fn health(&self) -> StreamHealth {
        self.health.borrow().clone()
    }
}

impl Outbound {
    /// Consume events without a control plane. Used when the agent runs
    /// standalone.
    pub fn discard(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut discarded = 0u64;
            while let Some(event) = self.rx.recv().await {
                discarded += 1;
                tracing::trace!(event = event.name(), discarded, "no control plane, event discarded");
            }
            drop(self.health);
        })
    }
}
