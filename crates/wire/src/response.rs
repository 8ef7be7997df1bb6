// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use outpost_core::JobId;
use serde::{Deserialize, Serialize};

use crate::{CancelOutcome, DeploymentDetail, HealthDetail, JobDetail, JobSummary};

/// Stable error classification returned to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidSpec,
    DuplicateId,
    StaleState,
    AlreadyTerminal,
    InvalidTransition,
    NotFound,
    QueueFull,
    Backend,
    Channel,
    Unauthorized,
    ShuttingDown,
    Internal,
}

outpost_core::simple_display! {
    ErrorKind {
        InvalidSpec => "invalid_spec",
        DuplicateId => "duplicate_id",
        StaleState => "stale_state",
        AlreadyTerminal => "already_terminal",
        InvalidTransition => "invalid_transition",
        NotFound => "not_found",
        QueueFull => "queue_full",
        Backend => "backend",
        Channel => "channel",
        Unauthorized => "unauthorized",
        ShuttingDown => "shutting_down",
        Internal => "internal",
    }
}

impl ErrorKind {
    /// Whether a client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::QueueFull | ErrorKind::StaleState | ErrorKind::Channel)
    }
}

/// Response from the daemon to an operator client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    /// Generic success
    Ok,

    /// Version handshake response
    Hello { version: String },

    Health { health: Box<HealthDetail> },

    JobSubmitted { id: JobId },

    Job { job: Box<JobDetail> },

    Jobs { jobs: Vec<JobSummary> },

    JobLogs {
        id: JobId,
        #[serde(default)]
        bytes: Vec<u8>,
    },

    Cancel { id: JobId, outcome: CancelOutcome },

    Deployment { deployment: Box<DeploymentDetail> },

    Deployments { deployments: Vec<DeploymentDetail> },

    /// Daemon is shutting down
    ShuttingDown,

    Error { kind: ErrorKind, message: String },
}

impl Response {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error { kind, message: message.into() }
    }
}
