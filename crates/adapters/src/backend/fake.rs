// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory backend for tests.
//!
//! Every submitted job gets a watch channel; tests drive it with
//! [`FakeJobBackend::finish`], [`FakeJobBackend::log`] and friends.

use super::{
    BackendError, JobBackend, JobSubmission, Progress, TerminalOutcome, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use outpost_core::{BackendHandle, CredentialRef, JobId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Submit { job_id: JobId, credential: Option<CredentialRef> },
    Watch { handle: BackendHandle },
    Cancel { handle: BackendHandle },
    Teardown { handle: BackendHandle },
    FetchLogs { handle: BackendHandle },
}

/// How the fake answers `cancel`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelBehavior {
    /// Accept and end the watch stream.
    #[default]
    Ack,
    Fail,
    /// Never return.
    Hang,
}

struct Run {
    tx: Option<mpsc::UnboundedSender<WatchEvent>>,
    rx: Option<mpsc::UnboundedReceiver<WatchEvent>>,
    logs: Vec<u8>,
    torn_down: bool,
}

#[derive(Default)]
struct FakeBackendState {
    calls: Vec<BackendCall>,
    runs: HashMap<BackendHandle, Run>,
    handles: HashMap<JobId, BackendHandle>,
    submit_failures: VecDeque<String>,
    hang_submit: bool,
    submit_delay: Option<Duration>,
    cancel_behavior: CancelBehavior,
    teardown_failures: u32,
}

/// Fake job backend for testing
#[derive(Clone, Default)]
pub struct FakeJobBackend {
    inner: Arc<Mutex<FakeBackendState>>,
}

impl FakeJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().calls.clone()
    }

    /// Job ids in submission order.
    pub fn submitted(&self) -> Vec<JobId> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::Submit { job_id, .. } => Some(job_id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn handle_for(&self, job_id: &JobId) -> Option<BackendHandle> {
        self.inner.lock().handles.get(job_id).cloned()
    }

    /// Number of submitted workloads not yet torn down.
    pub fn live_workloads(&self) -> usize {
        self.inner.lock().runs.values().filter(|r| !r.torn_down).count()
    }

    pub fn is_torn_down(&self, job_id: &JobId) -> bool {
        let state = self.inner.lock();
        state
            .handles
            .get(job_id)
            .and_then(|h| state.runs.get(h))
            .map(|r| r.torn_down)
            .unwrap_or(false)
    }

    /// Make the next submit fail with `message`.
    pub fn fail_next_submit(&self, message: impl Into<String>) {
        self.inner.lock().submit_failures.push_back(message.into());
    }

    /// Make every submit hang until cleared.
    pub fn set_hang_submit(&self, hang: bool) {
        self.inner.lock().hang_submit = hang;
    }

    /// Delay every successful submit by `delay` before the handle is returned.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.inner.lock().submit_delay = Some(delay);
    }

    pub fn set_cancel_behavior(&self, behavior: CancelBehavior) {
        self.inner.lock().cancel_behavior = behavior;
    }

    /// Make the next `count` teardowns fail.
    pub fn fail_teardowns(&self, count: u32) {
        self.inner.lock().teardown_failures = count;
    }

    /// Push an event onto a job's watch stream. Returns false if the job was
    /// never submitted or its stream is closed.
    pub fn emit(&self, job_id: &JobId, event: WatchEvent) -> bool {
        let mut state = self.inner.lock();
        let Some(handle) = state.handles.get(job_id).cloned() else {
            return false;
        };
        let Some(run) = state.runs.get_mut(&handle) else {
            return false;
        };
        if let WatchEvent::Progress(Progress::Log(bytes)) = &event {
            run.logs.extend_from_slice(bytes);
        }
        run.tx.as_ref().map(|tx| tx.send(event).is_ok()).unwrap_or(false)
    }

    /// Finish a job with the given exit code.
    pub fn finish(&self, job_id: &JobId, exit_code: i32) -> bool {
        let outcome = TerminalOutcome {
            output_ref: Some(format!("fake://{job_id}/output")),
            ..TerminalOutcome::from_exit_code(exit_code)
        };
        self.emit(job_id, WatchEvent::Terminal(outcome))
    }

    pub fn log(&self, job_id: &JobId, bytes: &[u8]) -> bool {
        self.emit(job_id, WatchEvent::Progress(Progress::Log(bytes.to_vec())))
    }

    pub fn phase(&self, job_id: &JobId, phase: &str) -> bool {
        self.emit(job_id, WatchEvent::Progress(Progress::Phase(phase.to_string())))
    }

    /// Close a job's watch stream without a terminal event.
    pub fn lose(&self, job_id: &JobId) {
        let mut state = self.inner.lock();
        if let Some(handle) = state.handles.get(job_id).cloned() {
            if let Some(run) = state.runs.get_mut(&handle) {
                run.tx = None;
            }
        }
    }
}

#[async_trait]
impl JobBackend for FakeJobBackend {
    async fn submit(&self, submission: &JobSubmission) -> Result<BackendHandle, BackendError> {
        let (hang, delay) = {
            let mut state = self.inner.lock();
            state.calls.push(BackendCall::Submit {
                job_id: submission.job_id.clone(),
                credential: submission.credential.clone(),
            });
            if let Some(message) = state.submit_failures.pop_front() {
                return Err(BackendError::Rejected(message));
            }
            (state.hang_submit, state.submit_delay)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.inner.lock();
        if state.handles.contains_key(&submission.job_id) {
            return Err(BackendError::Rejected(format!(
                "workload for {} already exists",
                submission.job_id
            )));
        }
        let handle = BackendHandle(format!("fake/{}", submission.job_id));
        let (tx, rx) = mpsc::unbounded_channel();
        state.runs.insert(
            handle.clone(),
            Run { tx: Some(tx), rx: Some(rx), logs: Vec::new(), torn_down: false },
        );
        state.handles.insert(submission.job_id.clone(), handle.clone());
        Ok(handle)
    }

    async fn watch(&self, handle: &BackendHandle) -> Result<WatchStream, BackendError> {
        let mut state = self.inner.lock();
        state.calls.push(BackendCall::Watch { handle: handle.clone() });
        let rx = state
            .runs
            .get_mut(handle)
            .and_then(|r| r.rx.take())
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))?;
        Ok(futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let behavior = {
            let mut state = self.inner.lock();
            state.calls.push(BackendCall::Cancel { handle: handle.clone() });
            state.cancel_behavior
        };
        match behavior {
            CancelBehavior::Ack => {
                if let Some(run) = self.inner.lock().runs.get_mut(handle) {
                    run.tx = None;
                }
                Ok(())
            }
            CancelBehavior::Fail => {
                Err(BackendError::Unavailable(format!("cancel refused for {handle}")))
            }
            CancelBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn teardown(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let mut state = self.inner.lock();
        state.calls.push(BackendCall::Teardown { handle: handle.clone() });
        if state.teardown_failures > 0 {
            state.teardown_failures -= 1;
            return Err(BackendError::Unavailable(format!("teardown failed for {handle}")));
        }
        if let Some(run) = state.runs.get_mut(handle) {
            run.torn_down = true;
            run.tx = None;
        }
        Ok(())
    }

    async fn fetch_logs(&self, handle: &BackendHandle) -> Result<Vec<u8>, BackendError> {
        let mut state = self.inner.lock();
        state.calls.push(BackendCall::FetchLogs { handle: handle.clone() });
        state
            .runs
            .get(handle)
            .map(|r| r.logs.clone())
            .ok_or_else(|| BackendError::NotFound(handle.to_string()))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
