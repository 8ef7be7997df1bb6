// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic drift detection.
//!
//! Each deployment gets its own timer task. A tick submits a `plan-only`
//! job through the [`Scheduler`] like any other caller; the verdict arrives
//! later as a [`TerminalNotice`]. At most one drift check per deployment is
//! in flight at a time.

use crate::config::DriftConfig;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::scheduler::{Scheduler, TerminalNotice};
use crate::session::Publisher;
use outpost_core::{
    Clock, Deployment, DeploymentId, DeploymentSpec, DriftStatus, ExitClass, JobId, JobKind,
    JobState, SpecLimits, ValidationError,
};
use outpost_wire::OutboundEvent;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

struct Entry {
    record: Deployment,
    stop: CancellationToken,
    kick: Arc<Notify>,
    check_timeout: Option<AbortHandle>,
    timed_out: Option<JobId>,
    /// Check job whose lease `record.credential` names.
    lease_holder: Option<JobId>,
}

struct DriftShared<C: Clock> {
    deployments: Mutex<HashMap<DeploymentId, Entry>>,
    scheduler: Scheduler<C>,
    publisher: Publisher,
    metrics: Arc<Metrics>,
    config: DriftConfig,
    limits: SpecLimits,
    shutdown: CancellationToken,
}

/// Handle to the drift loop.
pub struct DriftLoop<C: Clock> {
    shared: Arc<DriftShared<C>>,
}

impl<C: Clock> Clone for DriftLoop<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> DriftLoop<C> {
    pub fn start(
        scheduler: Scheduler<C>,
        publisher: Publisher,
        metrics: Arc<Metrics>,
        config: DriftConfig,
        limits: SpecLimits,
        shutdown: CancellationToken,
    ) -> Self {
        let notices = scheduler.subscribe();
        let shared = Arc::new(DriftShared {
            deployments: Mutex::new(HashMap::new()),
            scheduler,
            publisher,
            metrics,
            config,
            limits,
            shutdown,
        });
        tokio::spawn(observe(Arc::clone(&shared), notices));
        Self { shared }
    }

    /// Register a deployment and start its timer.
    pub fn register(&self, spec: DeploymentSpec) -> Result<Deployment, EngineError> {
        let record = spec.validate(&self.shared.limits)?;
        let id = record.id.clone();
        let stop = self.shared.shutdown.child_token();
        let kick = Arc::new(Notify::new());
        {
            let mut deployments = self.shared.deployments.lock();
            if deployments.contains_key(&id) {
                return Err(EngineError::DuplicateDeployment(id));
            }
            deployments.insert(
                id.clone(),
                Entry {
                    record: record.clone(),
                    stop: stop.clone(),
                    kick: Arc::clone(&kick),
                    check_timeout: None,
                    timed_out: None,
                    lease_holder: None,
                },
            );
        }
        tokio::spawn(run_timer(Arc::clone(&self.shared), id.clone(), stop, kick));
        tracing::info!(deployment = %id, interval_ms = record.interval.as_millis() as u64, "deployment registered");
        Ok(record)
    }

    /// Stop watching a deployment. An in-flight check runs to completion but
    /// no longer updates any status.
    pub fn remove(&self, id: &DeploymentId) -> Result<Deployment, EngineError> {
        let entry = self
            .shared
            .deployments
            .lock()
            .remove(id)
            .ok_or_else(|| EngineError::DeploymentNotFound(id.to_string()))?;
        entry.stop.cancel();
        if let Some(handle) = entry.check_timeout {
            handle.abort();
        }
        tracing::info!(deployment = %id, "deployment removed");
        Ok(entry.record)
    }

    /// Change the detection interval, effective from the next tick.
    pub fn update_interval(&self, id: &DeploymentId, interval: Duration) -> Result<Deployment, EngineError> {
        if interval.is_zero() {
            return Err(ValidationError::ZeroInterval.into());
        }
        let mut deployments = self.shared.deployments.lock();
        let entry = deployments
            .get_mut(id)
            .ok_or_else(|| EngineError::DeploymentNotFound(id.to_string()))?;
        entry.record.interval = interval;
        tracing::info!(deployment = %id, interval_ms = interval.as_millis() as u64, "drift interval updated");
        Ok(entry.record.clone())
    }

    pub fn status(&self, id: &DeploymentId) -> Result<Deployment, EngineError> {
        self.shared
            .deployments
            .lock()
            .get(id)
            .map(|e| self.shared.view(e))
            .ok_or_else(|| EngineError::DeploymentNotFound(id.to_string()))
    }

    /// All deployments, ordered by id.
    pub fn list(&self) -> Vec<Deployment> {
        let mut records: Vec<Deployment> =
            self.shared.deployments.lock().values().map(|e| self.shared.view(e)).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.shared.deployments.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fire a tick now. Still skipped if a check is in flight.
    pub fn check_now(&self, id: &DeploymentId) -> Result<(), EngineError> {
        let deployments = self.shared.deployments.lock();
        let entry =
            deployments.get(id).ok_or_else(|| EngineError::DeploymentNotFound(id.to_string()))?;
        entry.kick.notify_one();
        Ok(())
    }
}

impl<C: Clock> DriftShared<C> {
    /// Copy of the record, without a credential the reaper already released.
    fn view(&self, entry: &Entry) -> Deployment {
        let mut record = entry.record.clone();
        let live = entry.lease_holder.as_ref().is_some_and(|job_id| {
            self.scheduler.registry().get(job_id).is_ok_and(|job| job.credential.is_some())
        });
        if !live {
            record.credential = None;
        }
        record
    }

    fn next_delay(&self, id: &DeploymentId) -> Option<Duration> {
        let deployments = self.deployments.lock();
        let record = &deployments.get(id)?.record;
        Some(jittered(record.interval, record.jitter.unwrap_or(self.config.jitter)))
    }

    fn tick(self: &Arc<Self>, id: &DeploymentId) {
        let mut deployments = self.deployments.lock();
        let Some(entry) = deployments.get_mut(id) else {
            return;
        };
        if let Some(job_id) = &entry.record.in_flight {
            tracing::debug!(deployment = %id, %job_id, "drift check still in flight, skipping tick");
            return;
        }
        match self.scheduler.submit(entry.record.plan_request()) {
            Ok(job_id) => {
                entry.record.in_flight = Some(job_id.clone());
                entry.record.checks_started += 1;
                entry.record.last_check_ms = Some(self.scheduler.registry().clock().epoch_ms());
                entry.check_timeout = Some(self.spawn_check_timeout(id.clone(), job_id.clone()));
                tracing::info!(deployment = %id, %job_id, "drift check started");
            }
            Err(e) => {
                tracing::warn!(deployment = %id, error = %e, "drift check rejected, retrying next tick");
            }
        }
    }

    fn spawn_check_timeout(self: &Arc<Self>, id: DeploymentId, job_id: JobId) -> AbortHandle {
        let shared = Arc::clone(self);
        let limit = self.config.check_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            shared.on_check_timeout(&id, &job_id);
        })
        .abort_handle()
    }

    fn on_check_timeout(&self, id: &DeploymentId, job_id: &JobId) {
        {
            let mut deployments = self.deployments.lock();
            let Some(entry) = deployments.get_mut(id) else {
                return;
            };
            if entry.record.in_flight.as_ref() != Some(job_id) {
                return;
            }
            entry.timed_out = Some(job_id.clone());
        }
        tracing::warn!(deployment = %id, %job_id, "drift check timed out, cancelling");
        if let Err(e) = self.scheduler.request_cancel(job_id) {
            tracing::warn!(deployment = %id, %job_id, error = %e, "failed to cancel drift check");
        }
    }

    async fn on_check_finished(&self, notice: TerminalNotice) {
        let Some(id) = notice.deployment else {
            return;
        };
        let (previous, status) = {
            let mut deployments = self.deployments.lock();
            let Some(entry) = deployments.get_mut(&id) else {
                return;
            };
            // Operator plan-only jobs for the same deployment are not checks
            if entry.record.in_flight.as_ref() != Some(&notice.job_id) {
                return;
            }
            entry.record.in_flight = None;
            if let Some(handle) = entry.check_timeout.take() {
                handle.abort();
            }
            let timed_out = entry.timed_out.take().is_some_and(|j| j == notice.job_id);
            entry.record.credential = notice.credential.clone();
            entry.lease_holder = Some(notice.job_id.clone());

            let status =
                if timed_out { DriftStatus::CheckFailed } else { verdict(notice.state, notice.exit) };
            if matches!(status, DriftStatus::InSync | DriftStatus::Drifted) {
                entry.record.last_conclusive = status;
            }
            (std::mem::replace(&mut entry.record.status, status), status)
        };

        tracing::info!(
            deployment = %id,
            job_id = %notice.job_id,
            %status,
            %previous,
            "drift check finished"
        );
        if status == DriftStatus::Drifted {
            self.metrics.drift_detected();
        }
        if status == DriftStatus::Drifted || status != previous {
            let event = OutboundEvent::DriftNotification { deployment_id: id, status };
            self.publisher.publish(event).await;
        }
    }
}

fn verdict(state: JobState, exit: Option<ExitClass>) -> DriftStatus {
    match (state, exit) {
        (JobState::Succeeded, Some(ExitClass::Clean)) => DriftStatus::InSync,
        (JobState::Succeeded, Some(ExitClass::Changed)) => DriftStatus::Drifted,
        _ => DriftStatus::CheckFailed,
    }
}

/// `interval` shifted by a uniform offset in `[-jitter, +jitter]`, never
/// below one millisecond.
fn jittered(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let jitter_ms = jitter.as_millis() as u64;
    let offset = rand::thread_rng().gen_range(0..=jitter_ms.saturating_mul(2));
    let ms = (interval.as_millis() as u64).saturating_add(offset).saturating_sub(jitter_ms);
    Duration::from_millis(ms.max(1))
}

async fn run_timer<C: Clock>(
    shared: Arc<DriftShared<C>>,
    id: DeploymentId,
    stop: CancellationToken,
    kick: Arc<Notify>,
) {
    while let Some(delay) = shared.next_delay(&id) {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
            _ = kick.notified() => {}
        }
        shared.tick(&id);
    }
    tracing::debug!(deployment = %id, "drift timer stopped");
}

async fn observe<C: Clock>(
    shared: Arc<DriftShared<C>>,
    mut notices: mpsc::UnboundedReceiver<TerminalNotice>,
) {
    while let Some(notice) = notices.recv().await {
        if notice.kind == JobKind::PlanOnly {
            shared.on_check_finished(notice).await;
        }
    }
}

#[cfg(test)]
#[path = "drift_tests.rs"]
mod tests;
