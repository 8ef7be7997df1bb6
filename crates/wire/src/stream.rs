// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane channel frames.
//!
//! The agent sends [`AgentFrame`]s and receives [`ControlFrame`]s, one JSON
//! object per WebSocket text message.

use outpost_core::{DeploymentId, DriftStatus, JobId, JobState};
use serde::{Deserialize, Serialize};

/// Outbound event payload, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    JobStatusDelta {
        job_id: JobId,
        state: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    LogChunk {
        job_id: JobId,
        bytes: Vec<u8>,
    },
    DriftNotification {
        deployment_id: DeploymentId,
        status: DriftStatus,
    },
}

impl OutboundEvent {
    /// Log chunks may be dropped under pressure; everything else may not.
    pub fn is_droppable(&self) -> bool {
        matches!(self, OutboundEvent::LogChunk { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::JobStatusDelta { .. } => "job_status_delta",
            OutboundEvent::LogChunk { .. } => "log_chunk",
            OutboundEvent::DriftNotification { .. } => "drift_notification",
        }
    }
}

/// An event with its session sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequenced {
    pub seq: u64,
    pub event: OutboundEvent,
}

/// Agent → control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    /// First frame of every generation.
    Hello { agent_id: String, generation: u64, last_seq: u64 },
    Event { seq: u64, event: OutboundEvent },
}

impl From<Sequenced> for AgentFrame {
    fn from(s: Sequenced) -> Self {
        AgentFrame::Event { seq: s.seq, event: s.event }
    }
}

/// Operator command kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    CancelJob { job_id: JobId },
    UpdateInterval { deployment_id: DeploymentId, interval_ms: u64 },
    Resync,
}

/// An inbound command with its idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorCommand {
    pub command_id: String,
    pub command: CommandKind,
}

/// Control plane → agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Handshake reply carrying the highest sequence the peer holds.
    Welcome { watermark: u64 },
    Ack { watermark: u64 },
    Command(OperatorCommand),
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
