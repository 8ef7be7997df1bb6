// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job scheduler.
//!
//! [`Scheduler`] is a cheap handle. Validation, the queue ceiling and record
//! creation happen on the caller's task; everything that touches tokens or
//! the backend is serialized through a single dispatcher task:
//!
//! ```text
//! submit ──► registry (Pending → Validated) ──► Admit ──┐
//!                                                       ▼
//!   backend tasks ── Submitted / Progress / Terminal ──► Dispatcher ──► Publisher
//!                                                       │
//!                                           TerminalNotice observers
//! ```

mod dispatcher;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::registry::JobRegistry;
use crate::session::Publisher;
use crate::tokens::TokenPool;
use dispatcher::{Dispatcher, Msg};
use outpost_adapters::{JobBackend, SecretProvider};
use outpost_core::{
    Clock, CredentialRef, DeploymentId, ExitClass, Job, JobId, JobKind, JobRequest, JobState,
    SpecLimits, TransitionDetails,
};
use outpost_wire::CancelOutcome;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Sent to observers whenever a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalNotice {
    pub job_id: JobId,
    pub kind: JobKind,
    pub deployment: Option<DeploymentId>,
    pub state: JobState,
    pub exit: Option<ExitClass>,
    pub credential: Option<CredentialRef>,
}

impl From<&Job> for TerminalNotice {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.spec.kind,
            deployment: job.spec.deployment.clone(),
            state: job.state,
            exit: job.result.as_ref().map(|r| r.exit),
            credential: job.credential.clone(),
        }
    }
}

/// Point-in-time admission counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerStats {
    pub concurrency: usize,
    pub tokens_available: usize,
    /// Jobs sitting in `queued`.
    pub queued: usize,
    /// Admitted jobs not yet running (`validated` or `queued`).
    pub waiting: usize,
}

struct Shared<C: Clock> {
    registry: Arc<JobRegistry<C>>,
    backend: Arc<dyn JobBackend>,
    secrets: Arc<dyn SecretProvider>,
    metrics: Arc<Metrics>,
    publisher: Publisher,
    pool: TokenPool,
    limits: SpecLimits,
    queue_ceiling: usize,
    submit_timeout: Duration,
    cancel_grace: Duration,
    waiting: AtomicUsize,
    queued: AtomicUsize,
    observers: Mutex<Vec<mpsc::UnboundedSender<TerminalNotice>>>,
}

impl<C: Clock> Shared<C> {
    fn notify_terminal(&self, job: &Job) {
        let notice = TerminalNotice::from(job);
        self.observers.lock().retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn leave_waiting(&self) {
        let _ = self
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// Handle to the scheduler. Clones share the same dispatcher.
pub struct Scheduler<C: Clock> {
    shared: Arc<Shared<C>>,
    tx: mpsc::UnboundedSender<Msg>,
}

impl<C: Clock> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared), tx: self.tx.clone() }
    }
}

impl<C: Clock> Scheduler<C> {
    /// Spawn the dispatcher and return a handle to it.
    pub fn start(
        registry: Arc<JobRegistry<C>>,
        backend: Arc<dyn JobBackend>,
        secrets: Arc<dyn SecretProvider>,
        metrics: Arc<Metrics>,
        publisher: Publisher,
        config: &EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let shared = Arc::new(Shared {
            registry,
            backend,
            secrets,
            metrics,
            publisher,
            pool: TokenPool::new(config.concurrency),
            limits: config.limits,
            queue_ceiling: config.queue_ceiling,
            submit_timeout: config.submit_timeout,
            cancel_grace: config.cancel_grace,
            waiting: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            observers: Mutex::new(Vec::new()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(Arc::clone(&shared), tx.clone());
        tokio::spawn(dispatcher.run(rx, shutdown));
        Self { shared, tx }
    }

    pub fn registry(&self) -> &Arc<JobRegistry<C>> {
        &self.shared.registry
    }

    /// Validate and admit a job. Never waits on the backend.
    pub fn submit(&self, request: JobRequest) -> Result<JobId, EngineError> {
        let shared = &self.shared;
        let (id, spec) = request.validate(&shared.limits)?;

        let ceiling = shared.queue_ceiling;
        shared
            .waiting
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < ceiling).then_some(n + 1))
            .map_err(|_| EngineError::QueueFull { ceiling })?;

        let id = id.unwrap_or_else(JobId::generate);
        let kind = spec.kind;
        let now = shared.registry.clock().epoch_ms();
        if let Err(e) = shared.registry.create(Job::new(id.clone(), spec, now)) {
            shared.leave_waiting();
            return Err(e);
        }
        match shared.registry.transition(
            &id,
            JobState::Pending,
            JobState::Validated,
            TransitionDetails::new(),
        ) {
            Ok(_) => {}
            // Cancelled between creation and validation
            Err(EngineError::AlreadyTerminal { .. }) => {
                shared.leave_waiting();
                return Ok(id);
            }
            Err(e) => {
                shared.leave_waiting();
                return Err(e);
            }
        }

        shared.metrics.job_submitted();
        tracing::info!(job_id = %id, %kind, "job submitted");
        self.tx.send(Msg::Admit(id.clone())).map_err(|_| EngineError::ShuttingDown)?;
        Ok(id)
    }

    /// Cancel a job and wait for the dispatcher's verdict.
    pub async fn cancel(&self, id: &JobId) -> Result<CancelOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Cancel { id: id.clone(), reply: Some(reply) })
            .map_err(|_| EngineError::ShuttingDown)?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }

    /// Queue a cancellation without waiting for it.
    pub fn request_cancel(&self, id: &JobId) -> Result<(), EngineError> {
        self.tx
            .send(Msg::Cancel { id: id.clone(), reply: None })
            .map_err(|_| EngineError::ShuttingDown)
    }

    /// Receive a [`TerminalNotice`] for every job that finishes from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TerminalNotice> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.observers.lock().push(tx);
        rx
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            concurrency: self.shared.pool.capacity(),
            tokens_available: self.shared.pool.available(),
            queued: self.shared.queued.load(Ordering::Acquire),
            waiting: self.shared.waiting.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
