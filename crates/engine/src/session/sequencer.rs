// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sequencing and replay bookkeeping, free of any I/O.

use super::ChannelError;
use outpost_wire::{OutboundEvent, Pressure, Sequenced, StreamHealth};
use std::collections::VecDeque;

/// Sequence counter, acknowledgment watermark and replay buffer.
///
/// The buffer holds exactly the events with `seq > watermark`, in order.
/// `sent_upto` tracks how far the current generation has transmitted.
#[derive(Debug)]
pub struct SessionCore {
    capacity: usize,
    log_high_water: usize,
    next_seq: u64,
    watermark: u64,
    sent_upto: u64,
    max_sent: u64,
    generation: u64,
    buffer: VecDeque<Sequenced>,
}

impl SessionCore {
    pub fn new(capacity: usize, log_high_water: usize) -> Self {
        Self {
            capacity,
            log_high_water: log_high_water.min(capacity),
            next_seq: 1,
            watermark: 0,
            sent_upto: 0,
            max_sent: 0,
            generation: 0,
            buffer: VecDeque::new(),
        }
    }

    /// Assign the next sequence number and buffer the event.
    pub fn enqueue(&mut self, event: OutboundEvent) -> Result<u64, ChannelError> {
        if self.buffer.len() >= self.capacity {
            return Err(ChannelError::BackpressureExceeded { capacity: self.capacity });
        }
        if event.is_droppable() && self.buffer.len() >= self.log_high_water {
            return Err(ChannelError::LogsPaused);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.buffer.push_back(Sequenced { seq, event });
        Ok(seq)
    }

    /// Advance the watermark. Never moves backwards and never past the
    /// highest sequence actually transmitted. Returns the new watermark.
    pub fn ack(&mut self, watermark: u64) -> u64 {
        let watermark = watermark.min(self.max_sent);
        if watermark > self.watermark {
            self.watermark = watermark;
            while self.buffer.front().is_some_and(|e| e.seq <= watermark) {
                self.buffer.pop_front();
            }
            self.sent_upto = self.sent_upto.max(watermark);
        }
        self.watermark
    }

    /// Start a new generation resuming after `peer_watermark`.
    pub fn begin_generation(&mut self, peer_watermark: u64) -> u64 {
        self.ack(peer_watermark);
        self.generation += 1;
        self.sent_upto = self.watermark;
        self.generation
    }

    /// First buffered event not yet sent in this generation.
    pub fn next_unsent(&self) -> Option<&Sequenced> {
        let offset = self.sent_upto.saturating_sub(self.watermark) as usize;
        self.buffer.get(offset)
    }

    pub fn mark_sent(&mut self, seq: u64) {
        self.sent_upto = seq;
        self.max_sent = self.max_sent.max(seq);
    }

    pub fn pressure(&self) -> Pressure {
        if self.buffer.len() >= self.capacity {
            Pressure::Exceeded
        } else if self.buffer.len() >= self.log_high_water {
            Pressure::LogsPaused
        } else {
            Pressure::Normal
        }
    }

    /// Highest sequence number assigned so far.
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn unsent(&self) -> usize {
        self.buffer.len().saturating_sub(self.sent_upto.saturating_sub(self.watermark) as usize)
    }

    pub fn health(&self, connected: bool) -> StreamHealth {
        StreamHealth {
            connected,
            generation: self.generation,
            next_seq: self.next_seq,
            watermark: self.watermark,
            buffered: self.buffer.len(),
            pressure: self.pressure(),
        }
    }
}

#[cfg(test)]
#[path = "sequencer_tests.rs"]
mod tests;
