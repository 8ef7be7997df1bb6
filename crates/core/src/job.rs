// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job record and lifecycle state machine.

use crate::deployment::DeploymentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

crate::define_id! {
    /// Unique identifier for a job.
    ///
    /// Either supplied by the caller (control plane) or generated with the
    /// `job-` prefix. Never reused while the registry or the reaper still
    /// references it.
    pub struct JobId("job-");
}

/// What a job does to the infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    Apply,
    Destroy,
    /// Read-only plan used for drift detection.
    PlanOnly,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Apply, JobKind::Destroy, JobKind::PlanOnly];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Apply => "apply",
            JobKind::Destroy => "destroy",
            JobKind::PlanOnly => "plan-only",
        }
    }
}

crate::simple_display! {
    JobKind {
        Apply => "apply",
        Destroy => "destroy",
        PlanOnly => "plan-only",
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown job kind '{s}'"))
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──► Validated ──► Queued ──► Running ──► Succeeded
///    │            │  │          │         │  └───► Failed
///    │            │  └──────────┼────────►┘
///    └────────────┴─────────────┴─────────┴──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Validated,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Validated,
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Cancelled,
    ];

    /// Terminal states are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// States reachable from `self` in one step.
    pub fn successors(&self) -> &'static [JobState] {
        use JobState::*;
        match self {
            Pending => &[Validated, Cancelled],
            Validated => &[Queued, Running, Cancelled],
            Queued => &[Running, Cancelled],
            Running => &[Succeeded, Failed, Cancelled],
            Succeeded | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        self.successors().contains(&next)
    }
}

crate::simple_display! {
    JobState {
        Pending => "pending",
        Validated => "validated",
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|st| st.to_string() == s)
            .ok_or_else(|| format!("unknown job state '{s}'"))
    }
}

/// Opaque reference returned by the job backend on submit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendHandle(pub String);

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a leased credential held by the secret provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(pub String);

impl std::fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend classification of a finished run.
///
/// Mirrors a detailed exit code: `0` clean, `2` changes present, anything
/// else an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitClass {
    /// Completed with no pending changes.
    Clean,
    /// Completed and reported changes (applied, or present for a plan).
    Changed,
    /// Execution error.
    Error,
}

impl ExitClass {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ExitClass::Clean,
            2 => ExitClass::Changed,
            _ => ExitClass::Error,
        }
    }

    /// Lifecycle state a job ends in for this classification.
    pub fn terminal_state(&self) -> JobState {
        match self {
            ExitClass::Clean | ExitClass::Changed => JobState::Succeeded,
            ExitClass::Error => JobState::Failed,
        }
    }
}

crate::simple_display! {
    ExitClass {
        Clean => "clean",
        Changed => "changed",
        Error => "error",
    }
}

/// Result summary recorded when the backend reports a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub exit: ExitClass,
    /// Opaque pointer to the full output (log object, URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Why a job ended in `Failed` without a backend result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The backend rejected or timed out the submission.
    BackendSubmitError(String),
    /// The backend reported an execution error.
    Execution(String),
    /// The watch stream ended without a terminal outcome.
    BackendLost(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::BackendSubmitError(m) => write!(f, "backend submit error: {m}"),
            FailureReason::Execution(m) => write!(f, "execution error: {m}"),
            FailureReason::BackendLost(m) => write!(f, "backend lost: {m}"),
        }
    }
}

/// Validated job specification handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: JobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentId>,
    /// Command argv run by the backend.
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Opaque payload (plan inputs, archives) passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

/// One recorded lifecycle edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: JobState,
    pub to: JobState,
    pub at_ms: u64,
}

/// Extra data carried by a transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionDetails {
    pub detail: Option<String>,
    pub result: Option<JobResult>,
    pub failure: Option<FailureReason>,
    pub forced: bool,
    /// New value of the token ownership flag, when it changes.
    pub holds_token: Option<bool>,
}

impl TransitionDetails {
    pub fn new() -> Self {
        Self::default()
    }

    crate::setters! {
        set {
            forced: bool,
        }
        option {
            detail: String,
            result: JobResult,
            failure: FailureReason,
            holds_token: bool,
        }
    }
}

/// Rejected lifecycle edge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("job {id} is already terminal ({state})")]
    AlreadyTerminal { id: JobId, state: JobState },
    #[error("job {id} cannot move from {from} to {to}")]
    Invalid { id: JobId, from: JobState, to: JobState },
}

/// A job record as held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub state: JobState,
    pub created_at_ms: u64,
    pub transitioned_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_handle: Option<BackendHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialRef>,
    /// Latest progress detail reported by the backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// Cancellation finished by the grace timeout rather than a backend ack.
    #[serde(default)]
    pub forced_cancel: bool,
    /// Set by the scheduler while the job owns a concurrency token.
    #[serde(default)]
    pub holds_token: bool,
    /// Set when cleanup exhausted its retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_intervention: Option<String>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

impl Job {
    pub fn new(id: JobId, spec: JobSpec, now_ms: u64) -> Self {
        Self {
            id,
            spec,
            state: JobState::Pending,
            created_at_ms: now_ms,
            transitioned_at_ms: now_ms,
            backend_handle: None,
            credential: None,
            detail: None,
            result: None,
            failure: None,
            forced_cancel: false,
            holds_token: false,
            needs_intervention: None,
            history: Vec::new(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.spec.kind
    }

    pub fn deployment(&self) -> Option<&DeploymentId> {
        self.spec.deployment.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply a lifecycle edge, recording it in the history.
    pub fn apply_transition(
        &mut self,
        next: JobState,
        details: TransitionDetails,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::AlreadyTerminal { id: self.id.clone(), state: self.state });
        }
        if !self.state.can_transition_to(next) {
            return Err(TransitionError::Invalid { id: self.id.clone(), from: self.state, to: next });
        }

        self.history.push(TransitionRecord { from: self.state, to: next, at_ms: now_ms });
        self.state = next;
        self.transitioned_at_ms = now_ms;

        let TransitionDetails { detail, result, failure, forced, holds_token } = details;
        if detail.is_some() {
            self.detail = detail;
        }
        if result.is_some() {
            self.result = result;
        }
        if failure.is_some() {
            self.failure = failure;
        }
        if forced {
            self.forced_cancel = true;
        }
        if let Some(holds) = holds_token {
            self.holds_token = holds;
        }
        Ok(())
    }

    /// Sequence of states this job has been in, oldest first.
    pub fn state_path(&self) -> Vec<JobState> {
        let mut path = vec![self.history.first().map(|r| r.from).unwrap_or(self.state)];
        path.extend(self.history.iter().map(|r| r.to));
        path
    }
}

/// Selection criteria for listing jobs. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentId>,
    /// `Some(true)` for terminal jobs only, `Some(false)` for live jobs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    crate::setters! {
        set {
            states: Vec<JobState>,
        }
        option {
            kind: JobKind,
            deployment: DeploymentId,
            terminal: bool,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        (self.states.is_empty() || self.states.contains(&job.state))
            && self.kind.map_or(true, |k| k == job.spec.kind)
            && self.deployment.as_ref().map_or(true, |d| job.spec.deployment.as_ref() == Some(d))
            && self.terminal.map_or(true, |t| t == job.is_terminal())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
