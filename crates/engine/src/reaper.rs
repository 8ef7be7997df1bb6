// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-terminal cleanup of backend workloads, credential leases and
//! registry records.
//!
//! A single task owns a [`DelayQueue`]. Terminal notices schedule cleanup
//! after the grace period; acknowledgments run it at once. Each attempt
//! runs on its own task so a slow backend never stalls the queue.

use crate::config::ReaperConfig;
use crate::error::EngineError;
use crate::registry::JobRegistry;
use crate::scheduler::TerminalNotice;
use outpost_adapters::{BackendError, JobBackend, SecretProvider};
use outpost_core::{Clock, JobId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};

/// Result of a cleanup run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    Cleaned,
    /// The record was already gone.
    AlreadyClean,
}

type Reply = oneshot::Sender<Result<CleanupOutcome, EngineError>>;

enum Msg {
    Acknowledge { id: JobId, reply: Reply },
    Finished { id: JobId, result: Result<CleanupOutcome, EngineError> },
}

/// Handle to the reaper task.
#[derive(Clone)]
pub struct Reaper {
    tx: mpsc::UnboundedSender<Msg>,
}

impl Reaper {
    pub fn start<C: Clock>(
        registry: Arc<JobRegistry<C>>,
        backend: Arc<dyn JobBackend>,
        secrets: Arc<dyn SecretProvider>,
        config: ReaperConfig,
        notices: mpsc::UnboundedReceiver<TerminalNotice>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = ReaperTask {
            cleaner: Arc::new(Cleaner { registry, backend, secrets }),
            config,
            queue: DelayQueue::new(),
            keys: HashMap::new(),
            attempts: HashMap::new(),
            running: HashSet::new(),
            waiters: HashMap::new(),
            tx: tx.clone(),
        };
        tokio::spawn(task.run(rx, notices, shutdown));
        Self { tx }
    }

    /// Clean up a terminal job now, skipping the grace period.
    pub async fn acknowledge(&self, id: &JobId) -> Result<CleanupOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Msg::Acknowledge { id: id.clone(), reply })
            .map_err(|_| EngineError::ShuttingDown)?;
        rx.await.map_err(|_| EngineError::ShuttingDown)?
    }
}

struct Cleaner<C: Clock> {
    registry: Arc<JobRegistry<C>>,
    backend: Arc<dyn JobBackend>,
    secrets: Arc<dyn SecretProvider>,
}

impl<C: Clock> Cleaner<C> {
    /// Teardown, then release, then forget. Each finished step is recorded
    /// so a retry only repeats what failed.
    async fn cleanup(&self, id: &JobId) -> Result<CleanupOutcome, EngineError> {
        let job = match self.registry.get(id) {
            Ok(job) => job,
            Err(EngineError::JobNotFound(_)) => return Ok(CleanupOutcome::AlreadyClean),
            Err(e) => return Err(e),
        };
        if !job.is_terminal() {
            return Err(EngineError::NotTerminal { id: id.clone(), state: job.state });
        }

        if let Some(handle) = &job.backend_handle {
            match self.backend.teardown(handle).await {
                Ok(()) | Err(BackendError::NotFound(_)) => {}
                Err(e) => return Err(EngineError::Backend(e.to_string())),
            }
            self.registry.update(id, job.state, |j| j.backend_handle = None)?;
        }
        if let Some(credential) = &job.credential {
            self.secrets
                .release(credential)
                .await
                .map_err(|e| EngineError::Credential(e.to_string()))?;
            self.registry.update(id, job.state, |j| j.credential = None)?;
        }

        self.registry.remove(id);
        tracing::info!(job_id = %id, state = %job.state, "job cleaned up");
        Ok(CleanupOutcome::Cleaned)
    }
}

struct ReaperTask<C: Clock> {
    cleaner: Arc<Cleaner<C>>,
    config: ReaperConfig,
    queue: DelayQueue<JobId>,
    keys: HashMap<JobId, delay_queue::Key>,
    /// Failed attempts so far, per job.
    attempts: HashMap<JobId, u32>,
    running: HashSet<JobId>,
    waiters: HashMap<JobId, Vec<Reply>>,
    tx: mpsc::UnboundedSender<Msg>,
}

impl<C: Clock> ReaperTask<C> {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Msg>,
        mut notices: mpsc::UnboundedReceiver<TerminalNotice>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(notice) = notices.recv() => self.schedule(notice.job_id),
                Some(msg) = rx.recv() => self.handle(msg),
                Some(expired) = std::future::poll_fn(|cx| self.queue.poll_expired(cx)),
                    if !self.queue.is_empty() =>
                {
                    let id = expired.into_inner();
                    self.keys.remove(&id);
                    self.start_attempt(id);
                }
            }
        }
        tracing::debug!(pending = self.keys.len(), "reaper stopped");
    }

    fn schedule(&mut self, id: JobId) {
        if self.keys.contains_key(&id) || self.running.contains(&id) {
            return;
        }
        tracing::debug!(job_id = %id, grace_ms = self.config.grace.as_millis() as u64, "cleanup scheduled");
        let key = self.queue.insert(id.clone(), self.config.grace);
        self.keys.insert(id, key);
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Acknowledge { id, reply } => {
                self.waiters.entry(id.clone()).or_default().push(reply);
                if self.running.contains(&id) {
                    return;
                }
                if let Some(key) = self.keys.remove(&id) {
                    self.queue.remove(&key);
                }
                self.start_attempt(id);
            }
            Msg::Finished { id, result } => self.finished(id, result),
        }
    }

    fn start_attempt(&mut self, id: JobId) {
        self.running.insert(id.clone());
        let cleaner = Arc::clone(&self.cleaner);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = cleaner.cleanup(&id).await;
            let _ = tx.send(Msg::Finished { id, result });
        });
    }

    fn finished(&mut self, id: JobId, result: Result<CleanupOutcome, EngineError>) {
        self.running.remove(&id);
        for reply in self.waiters.remove(&id).unwrap_or_default() {
            let _ = reply.send(result.clone());
        }

        let err = match result {
            Ok(_) => {
                self.attempts.remove(&id);
                return;
            }
            Err(EngineError::NotTerminal { .. }) => return,
            Err(e) => e,
        };

        let failures = self.attempts.entry(id.clone()).or_insert(0);
        *failures += 1;
        if *failures >= self.config.max_attempts {
            let failures = *failures;
            self.attempts.remove(&id);
            tracing::error!(job_id = %id, failures, error = %err, "cleanup abandoned, manual intervention needed");
            let reason = format!("cleanup failed {failures} times: {err}");
            if let Err(e) = self.cleaner.registry.flag_for_intervention(&id, reason) {
                tracing::warn!(job_id = %id, error = %e, "failed to flag job");
            }
            return;
        }

        let delay = self.config.retry.delay(*failures - 1);
        tracing::warn!(job_id = %id, error = %err, retry_ms = delay.as_millis() as u64, "cleanup failed, retrying");
        let key = self.queue.insert(id.clone(), delay);
        self.keys.insert(id, key);
    }
}

#[cfg(test)]
#[path = "reaper_tests.rs"]
mod tests;
