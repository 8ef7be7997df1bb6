// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job execution backends.
//!
//! A backend runs one [`JobSubmission`] as an isolated workload and reports
//! back through a [`WatchStream`]:
//!
//! ```text
//! submit ──► handle ──► watch ──► Progress* ──► Terminal
//!                  └──► cancel / teardown / fetch_logs
//! ```
//!
//! A watch stream that ends without a `Terminal` event means the backend lost
//! track of the workload.

mod k8s;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{BackendCall, CancelBehavior, FakeJobBackend};

pub use k8s::{KubernetesBackend, KubernetesConfig};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use outpost_core::{BackendHandle, CredentialRef, ExitClass, JobId, JobResult, JobSpec};
use thiserror::Error;

/// Errors from backend operations
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("backend object not found: {0}")]
    NotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Everything a backend needs to start a job.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub job_id: JobId,
    pub spec: JobSpec,
    /// Leased deployment credential, exposed to the workload.
    pub credential: Option<CredentialRef>,
}

/// Non-terminal progress reported while a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Human-readable phase ("pending", "running on node-3").
    Phase(String),
    /// Newly produced output bytes.
    Log(Vec<u8>),
}

/// Final outcome of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutcome {
    pub exit: ExitClass,
    pub exit_code: Option<i32>,
    pub output_ref: Option<String>,
    pub message: Option<String>,
}

impl TerminalOutcome {
    pub fn from_exit_code(code: i32) -> Self {
        Self {
            exit: ExitClass::from_exit_code(code),
            exit_code: Some(code),
            output_ref: None,
            message: None,
        }
    }

    pub fn into_result(self) -> JobResult {
        JobResult { exit: self.exit, output_ref: self.output_ref, message: self.message }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Progress(Progress),
    Terminal(TerminalOutcome),
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Adapter for running jobs on an isolated execution platform
#[async_trait]
pub trait JobBackend: Send + Sync + 'static {
    /// Start the workload. Must not wait for it to finish.
    async fn submit(&self, submission: &JobSubmission) -> Result<BackendHandle, BackendError>;

    /// Stream progress and the terminal outcome for a submitted workload.
    async fn watch(&self, handle: &BackendHandle) -> Result<WatchStream, BackendError>;

    /// Request termination. Returns once the platform accepted the request.
    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Delete every platform object for the handle. Idempotent.
    async fn teardown(&self, handle: &BackendHandle) -> Result<(), BackendError>;

    /// Full output captured so far.
    async fn fetch_logs(&self, handle: &BackendHandle) -> Result<Vec<u8>, BackendError>;
}
