// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read models returned by the administrative surface.

use outpost_core::{
    BackendHandle, Deployment, DeploymentId, DriftStatus, FailureReason, Job, JobId, JobKind,
    JobResult, JobState, MetricsSnapshot, TransitionRecord,
};
use serde::{Deserialize, Serialize};

/// One line of a job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentId>,
    pub created_at_ms: u64,
    pub transitioned_at_ms: u64,
    #[serde(default)]
    pub needs_intervention: bool,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: job.spec.kind,
            state: job.state,
            deployment: job.spec.deployment.clone(),
            created_at_ms: job.created_at_ms,
            transitioned_at_ms: job.transitioned_at_ms,
            needs_intervention: job.needs_intervention.is_some(),
        }
    }
}

/// Full job record minus the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentId>,
    pub command: Vec<String>,
    pub payload_bytes: usize,
    pub created_at_ms: u64,
    pub transitioned_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_handle: Option<BackendHandle>,
    #[serde(default)]
    pub has_credential: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(default)]
    pub forced_cancel: bool,
    #[serde(default)]
    pub holds_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_intervention: Option<String>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

impl From<&Job> for JobDetail {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: job.spec.kind,
            state: job.state,
            deployment: job.spec.deployment.clone(),
            command: job.spec.command.clone(),
            payload_bytes: job.spec.payload.len(),
            created_at_ms: job.created_at_ms,
            transitioned_at_ms: job.transitioned_at_ms,
            backend_handle: job.backend_handle.clone(),
            has_credential: job.credential.is_some(),
            detail: job.detail.clone(),
            result: job.result.clone(),
            failure: job.failure.clone(),
            forced_cancel: job.forced_cancel,
            holds_token: job.holds_token,
            needs_intervention: job.needs_intervention.clone(),
            history: job.history.clone(),
        }
    }
}

/// Drift view of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDetail {
    pub id: DeploymentId,
    pub interval_ms: u64,
    pub status: DriftStatus,
    pub last_conclusive: DriftStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<JobId>,
    #[serde(default)]
    pub checks_started: u64,
}

impl From<&Deployment> for DeploymentDetail {
    fn from(d: &Deployment) -> Self {
        Self {
            id: d.id.clone(),
            interval_ms: d.interval.as_millis() as u64,
            status: d.status,
            last_conclusive: d.last_conclusive,
            last_check_ms: d.last_check_ms,
            in_flight: d.in_flight.clone(),
            checks_started: d.checks_started,
        }
    }
}

/// How a cancel request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job reached `cancelled` before the call returned.
    Cancelled,
    /// Backend cancellation issued; the job settles asynchronously.
    Requested,
}

/// Stream pressure as seen by producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pressure {
    #[default]
    Normal,
    /// Log chunks are being dropped; status and drift events still flow.
    LogsPaused,
    /// The replay buffer is full; the session has stopped draining producers.
    Exceeded,
}

outpost_core::simple_display! {
    Pressure {
        Normal => "normal",
        LogsPaused => "logs_paused",
        Exceeded => "exceeded",
    }
}

/// Control-plane session state reported by `HealthCheck`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreamHealth {
    pub connected: bool,
    pub generation: u64,
    pub next_seq: u64,
    pub watermark: u64,
    pub buffered: usize,
    pub pressure: Pressure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthDetail {
    pub version: String,
    pub uptime_ms: u64,
    pub concurrency: usize,
    pub tokens_available: usize,
    pub queued: usize,
    pub deployments: usize,
    pub stream: StreamHealth,
    pub metrics: MetricsSnapshot,
}
