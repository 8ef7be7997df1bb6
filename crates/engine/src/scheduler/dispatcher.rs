// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher task: owns tokens, the FIFO queue and every backend call.

use super::Shared;
use crate::error::EngineError;
use crate::tokens::Token;
use futures_util::StreamExt;
use outpost_adapters::{JobSubmission, Progress, TerminalOutcome, WatchEvent};
use outpost_core::{
    BackendHandle, Clock, CredentialRef, ExitClass, FailureReason, Job, JobId, JobState,
    TransitionDetails,
};
use outpost_wire::{CancelOutcome, OutboundEvent};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type CancelReply = oneshot::Sender<Result<CancelOutcome, EngineError>>;

pub(super) enum Msg {
    Admit(JobId),
    Submitted {
        id: JobId,
        credential: Option<CredentialRef>,
        result: Result<BackendHandle, String>,
    },
    Progress {
        id: JobId,
        detail: String,
    },
    Terminal {
        id: JobId,
        outcome: TerminalOutcome,
    },
    WatchEnded {
        id: JobId,
        reason: String,
    },
    Cancel {
        id: JobId,
        reply: Option<CancelReply>,
    },
    CancelSettled {
        id: JobId,
        forced: bool,
    },
}

pub(super) struct Dispatcher<C: Clock> {
    shared: Arc<Shared<C>>,
    tx: mpsc::UnboundedSender<Msg>,
    tokens: HashMap<JobId, Token>,
    /// Ordered by (created_at_ms, id).
    queue: BTreeSet<(u64, JobId)>,
    /// Running jobs with a backend cancellation in progress.
    cancelling: HashSet<JobId>,
    /// Running jobs cancelled before their backend handle arrived.
    deferred_cancel: HashSet<JobId>,
}

impl<C: Clock> Dispatcher<C> {
    pub(super) fn new(shared: Arc<Shared<C>>, tx: mpsc::UnboundedSender<Msg>) -> Self {
        Self {
            shared,
            tx,
            tokens: HashMap::new(),
            queue: BTreeSet::new(),
            cancelling: HashSet::new(),
            deferred_cancel: HashSet::new(),
        }
    }

    pub(super) async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
            }
        }
        tracing::info!(running = self.tokens.len(), queued = self.queue.len(), "dispatcher stopped");
    }

    async fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Admit(id) => self.admit(id).await,
            Msg::Submitted { id, credential, result } => {
                self.on_submitted(id, credential, result).await
            }
            Msg::Progress { id, detail } => self.on_progress(id, detail).await,
            Msg::Terminal { id, outcome } => self.on_terminal(id, outcome).await,
            Msg::WatchEnded { id, reason } => self.on_watch_ended(id, reason).await,
            Msg::Cancel { id, reply } => {
                let result = self.cancel(&id).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            tracing::warn!(job_id = %id, error = %e, "cancel request failed");
                        }
                    }
                }
            }
            Msg::CancelSettled { id, forced } => {
                let detail = if forced { "cancellation forced after grace period" } else { "cancelled" };
                self.finish(&id, JobState::Cancelled, TransitionDetails::new().forced(forced).detail(detail))
                    .await;
            }
        }
    }

    // -- admission --------------------------------------------------------

    async fn admit(&mut self, id: JobId) {
        let registry = &self.shared.registry;
        let job = match registry.get(&id) {
            Ok(job) if job.state == JobState::Validated => job,
            Ok(job) => {
                tracing::debug!(job_id = %id, state = %job.state, "admission skipped");
                return;
            }
            Err(_) => return,
        };
        self.emit_status(&job).await;

        if self.queue.is_empty() && self.shared.pool.available() > 0 {
            self.grant(&id, JobState::Validated).await;
            return;
        }
        match registry.transition(&id, JobState::Validated, JobState::Queued, TransitionDetails::new())
        {
            Ok(job) => {
                self.queue.insert((job.created_at_ms, id));
                self.sync_queue();
                self.emit_status(&job).await;
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to queue job"),
        }
    }

    /// Move `id` from `from` to `running` if a token is free.
    async fn grant(&mut self, id: &JobId, from: JobState) -> bool {
        let Some(token) = self.shared.pool.try_acquire() else {
            return false;
        };
        let granted = self.shared.registry.transition(
            id,
            from,
            JobState::Running,
            TransitionDetails::new().holds_token(true),
        );
        match granted {
            Ok(job) => {
                self.shared.leave_waiting();
                self.tokens.insert(id.clone(), token);
                self.shared.metrics.set_active_jobs(self.tokens.len());
                tracing::info!(job_id = %id, kind = %job.spec.kind, "job running");
                self.emit_status(&job).await;
                self.spawn_submit(job);
                true
            }
            Err(e) => {
                self.shared.pool.release(token);
                tracing::warn!(job_id = %id, error = %e, "token grant rejected");
                false
            }
        }
    }

    async fn dispatch_next(&mut self) {
        while self.shared.pool.available() > 0 {
            let Some((_, id)) = self.queue.pop_first() else {
                break;
            };
            self.sync_queue();
            self.grant(&id, JobState::Queued).await;
        }
    }

    fn sync_queue(&self) {
        self.shared.queued.store(self.queue.len(), Ordering::Release);
    }

    // -- backend ----------------------------------------------------------

    fn spawn_submit(&self, job: Job) {
        let shared = Arc::clone(&self.shared);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let Job { id, spec, .. } = job;
            let limit = shared.submit_timeout;

            let credential = match &spec.deployment {
                Some(deployment) => match timeout(limit, shared.secrets.lease(deployment)).await {
                    Ok(Ok(credential)) => Some(credential),
                    Ok(Err(e)) => {
                        let result = Err(format!("credential lease failed: {e}"));
                        let _ = tx.send(Msg::Submitted { id, credential: None, result });
                        return;
                    }
                    Err(_) => {
                        let result = Err(format!("credential lease timed out after {limit:?}"));
                        let _ = tx.send(Msg::Submitted { id, credential: None, result });
                        return;
                    }
                },
                None => None,
            };

            let submission = JobSubmission { job_id: id, spec, credential };
            let result = match timeout(limit, shared.backend.submit(&submission)).await {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("submit timed out after {limit:?}")),
            };
            let JobSubmission { job_id, credential, .. } = submission;
            let _ = tx.send(Msg::Submitted { id: job_id, credential, result });
        });
    }

    fn spawn_watch(&self, id: JobId, handle: BackendHandle) {
        let shared = Arc::clone(&self.shared);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut stream = match shared.backend.watch(&handle).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Msg::WatchEnded { id, reason: e.to_string() });
                    return;
                }
            };
            while let Some(event) = stream.next().await {
                match event {
                    WatchEvent::Progress(Progress::Log(bytes)) => {
                        let chunk = OutboundEvent::LogChunk { job_id: id.clone(), bytes };
                        shared.publisher.publish(chunk).await;
                    }
                    WatchEvent::Progress(Progress::Phase(detail)) => {
                        let _ = tx.send(Msg::Progress { id: id.clone(), detail });
                    }
                    WatchEvent::Terminal(outcome) => {
                        let _ = tx.send(Msg::Terminal { id, outcome });
                        return;
                    }
                }
            }
            let reason = "watch stream ended without a result".to_string();
            let _ = tx.send(Msg::WatchEnded { id, reason });
        });
    }

    fn spawn_backend_cancel(&self, id: JobId, handle: BackendHandle) {
        let shared = Arc::clone(&self.shared);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let forced = match timeout(shared.cancel_grace, shared.backend.cancel(&handle)).await {
                Ok(Ok(())) => false,
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %id, error = %e, "backend cancellation failed");
                    true
                }
                Err(_) => {
                    tracing::warn!(job_id = %id, "backend cancellation timed out");
                    true
                }
            };
            let _ = tx.send(Msg::CancelSettled { id, forced });
        });
    }

    /// Best-effort cleanup for a workload whose job has moved on.
    fn spawn_orphan_teardown(&self, id: JobId, handle: BackendHandle, credential: Option<CredentialRef>) {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = shared.backend.teardown(&handle).await {
                tracing::warn!(job_id = %id, %handle, error = %e, "orphan teardown failed");
            }
            if let Some(credential) = credential {
                if let Err(e) = shared.secrets.release(&credential).await {
                    tracing::warn!(job_id = %id, error = %e, "orphan credential release failed");
                }
            }
        });
    }

    async fn on_submitted(
        &mut self,
        id: JobId,
        credential: Option<CredentialRef>,
        result: Result<BackendHandle, String>,
    ) {
        let registry = &self.shared.registry;
        match result {
            Ok(handle) => {
                let recorded = registry.update(&id, JobState::Running, |job| {
                    job.backend_handle = Some(handle.clone());
                    job.credential = credential.clone();
                });
                if let Err(e) = recorded {
                    tracing::warn!(job_id = %id, error = %e, "backend accepted a job that moved on");
                    self.spawn_orphan_teardown(id, handle, credential);
                    return;
                }
                tracing::debug!(job_id = %id, %handle, "backend accepted job");
                self.spawn_watch(id.clone(), handle.clone());
                if self.deferred_cancel.remove(&id) {
                    self.spawn_backend_cancel(id, handle);
                }
            }
            Err(message) => {
                if credential.is_some() {
                    let _ = registry.update(&id, JobState::Running, |job| job.credential = credential);
                }
                tracing::warn!(job_id = %id, error = %message, "backend submission failed");
                let failure = FailureReason::BackendSubmitError(message);
                self.finish(&id, JobState::Failed, TransitionDetails::new().failure(failure)).await;
            }
        }
    }

    async fn on_progress(&mut self, id: JobId, detail: String) {
        let updated = self.shared.registry.update(&id, JobState::Running, |job| {
            job.detail = Some(detail);
        });
        if let Ok(job) = updated {
            self.emit_status(&job).await;
        }
    }

    async fn on_terminal(&mut self, id: JobId, outcome: TerminalOutcome) {
        // Exit caused by our own kill signal
        if self.cancelling.contains(&id) {
            let details = TransitionDetails::new()
                .result(outcome.into_result())
                .forced(false)
                .detail("cancelled");
            self.finish(&id, JobState::Cancelled, details).await;
            return;
        }
        let state = outcome.exit.terminal_state();
        let failure = (outcome.exit == ExitClass::Error).then(|| {
            let message = match (&outcome.message, outcome.exit_code) {
                (Some(message), _) => message.clone(),
                (None, Some(code)) => format!("exit code {code}"),
                (None, None) => "execution failed".to_string(),
            };
            FailureReason::Execution(message)
        });
        let mut details = TransitionDetails::new().result(outcome.into_result());
        if let Some(failure) = failure {
            details = details.failure(failure);
        }
        self.finish(&id, state, details).await;
    }

    async fn on_watch_ended(&mut self, id: JobId, reason: String) {
        if self.cancelling.contains(&id) {
            tracing::debug!(job_id = %id, "watch ended during cancellation");
            return;
        }
        let failure = FailureReason::BackendLost(reason);
        self.finish(&id, JobState::Failed, TransitionDetails::new().failure(failure)).await;
    }

    // -- cancellation -----------------------------------------------------

    async fn cancel(&mut self, id: &JobId) -> Result<CancelOutcome, EngineError> {
        let registry = &self.shared.registry;
        let job = registry.get(id)?;
        match job.state {
            state if state.is_terminal() => Err(EngineError::AlreadyTerminal { id: id.clone(), state }),
            JobState::Pending | JobState::Validated => {
                let job = registry.transition(
                    id,
                    job.state,
                    JobState::Cancelled,
                    TransitionDetails::new().detail("cancelled before admission"),
                )?;
                if job.history.iter().any(|r| r.to == JobState::Validated) {
                    self.shared.leave_waiting();
                }
                self.settle(job).await;
                Ok(CancelOutcome::Cancelled)
            }
            JobState::Queued => {
                self.queue.remove(&(job.created_at_ms, id.clone()));
                self.sync_queue();
                let job = registry.transition(
                    id,
                    JobState::Queued,
                    JobState::Cancelled,
                    TransitionDetails::new().detail("cancelled while queued"),
                )?;
                self.shared.leave_waiting();
                self.settle(job).await;
                Ok(CancelOutcome::Cancelled)
            }
            _ => {
                if !self.cancelling.insert(id.clone()) {
                    return Ok(CancelOutcome::Requested);
                }
                tracing::info!(job_id = %id, "cancelling running job");
                match job.backend_handle {
                    Some(handle) => self.spawn_backend_cancel(id.clone(), handle),
                    None => {
                        self.deferred_cancel.insert(id.clone());
                    }
                }
                Ok(CancelOutcome::Requested)
            }
        }
    }

    // -- completion -------------------------------------------------------

    /// Move a running job to a terminal state.
    async fn finish(&mut self, id: &JobId, next: JobState, details: TransitionDetails) {
        let finished =
            self.shared.registry.transition(id, JobState::Running, next, details.holds_token(false));
        match finished {
            Ok(job) => self.settle(job).await,
            Err(EngineError::AlreadyTerminal { state, .. }) => {
                tracing::debug!(job_id = %id, %state, ignored = %next, "job already settled");
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to finish job"),
        }
    }

    /// Bookkeeping for a job that just became terminal.
    async fn settle(&mut self, job: Job) {
        if let Some(token) = self.tokens.remove(&job.id) {
            self.shared.pool.release(token);
            self.shared.metrics.set_active_jobs(self.tokens.len());
        }
        self.cancelling.remove(&job.id);
        self.deferred_cancel.remove(&job.id);

        self.shared.metrics.job_finished(&job);
        tracing::info!(
            job_id = %job.id,
            state = %job.state,
            forced = job.forced_cancel,
            "job finished"
        );
        self.emit_status(&job).await;
        self.shared.notify_terminal(&job);
        self.dispatch_next().await;
    }

    async fn emit_status(&self, job: &Job) {
        let detail = match (&job.failure, &job.detail) {
            (Some(failure), _) if job.state == JobState::Failed => Some(failure.to_string()),
            (_, detail) => detail.clone(),
        };
        let event = OutboundEvent::JobStatusDelta { job_id: job.id.clone(), state: job.state, detail };
        self.shared.publisher.publish(event).await;
    }
}
