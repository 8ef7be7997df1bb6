// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime façade: wires the engine components together and exposes the
//! operations served by the administrative surface.

use crate::config::EngineConfig;
use crate::drift::DriftLoop;
use crate::error::EngineError;
use crate::metrics::Metrics;
use crate::reaper::{CleanupOutcome, Reaper};
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::session::{self, CommandHandler, Publisher, StreamSession, Transport};
use outpost_adapters::{JobBackend, MetricsSink, SecretProvider};
use outpost_core::{
    Clock, Deployment, DeploymentId, DeploymentSpec, Job, JobFilter, JobId, JobRequest,
};
use outpost_wire::{CancelOutcome, CommandKind, HealthDetail, OutboundEvent, StreamHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// External dependencies of the runtime.
pub struct RuntimeDeps {
    pub backend: Arc<dyn JobBackend>,
    pub secrets: Arc<dyn SecretProvider>,
    pub metrics: Arc<dyn MetricsSink>,
}

/// Runtime that coordinates the system
pub struct Runtime<C: Clock> {
    registry: Arc<JobRegistry<C>>,
    scheduler: Scheduler<C>,
    drift: DriftLoop<C>,
    reaper: Reaper,
    backend: Arc<dyn JobBackend>,
    publisher: Publisher,
    metrics: Arc<Metrics>,
    started_at_ms: u64,
}

impl<C: Clock> Runtime<C> {
    /// Start every engine task. Without a transport the outbound stream is
    /// drained and discarded.
    pub fn start(
        deps: RuntimeDeps,
        clock: C,
        config: EngineConfig,
        transport: Option<Arc<dyn Transport>>,
        shutdown: CancellationToken,
    ) -> Self {
        let started_at_ms = clock.epoch_ms();
        let metrics = Arc::new(Metrics::new(deps.metrics));
        let (publisher, outbound) =
            session::channel(config.session.fan_in_capacity, Arc::clone(&metrics));
        let registry = Arc::new(JobRegistry::new(clock));

        let scheduler = Scheduler::start(
            Arc::clone(&registry),
            Arc::clone(&deps.backend),
            Arc::clone(&deps.secrets),
            Arc::clone(&metrics),
            publisher.clone(),
            &config,
            shutdown.clone(),
        );
        let backend = deps.backend;
        let reaper = Reaper::start(
            Arc::clone(&registry),
            Arc::clone(&backend),
            deps.secrets,
            config.reaper,
            scheduler.subscribe(),
            shutdown.clone(),
        );
        let drift = DriftLoop::start(
            scheduler.clone(),
            publisher.clone(),
            Arc::clone(&metrics),
            config.drift,
            config.limits,
            shutdown.clone(),
        );

        match transport {
            Some(transport) => {
                let router = CommandRouter::new(scheduler.clone(), drift.clone());
                let session = StreamSession::new(
                    config.session.clone(),
                    outbound,
                    transport,
                    Arc::new(router),
                    Arc::clone(&metrics),
                );
                tokio::spawn(session.run(shutdown));
            }
            None => {
                tracing::info!("no control plane configured, outbound events are discarded");
                outbound.discard();
            }
        }

        tracing::info!(
            concurrency = config.concurrency,
            queue_ceiling = config.queue_ceiling,
            "engine started"
        );
        Self { registry, scheduler, drift, reaper, backend, publisher, metrics, started_at_ms }
    }

    pub fn submit_job(&self, request: JobRequest) -> Result<JobId, EngineError> {
        self.scheduler.submit(request)
    }

    pub fn get_job(&self, id: &str) -> Result<Job, EngineError> {
        self.registry.get(&JobId::new(id))
    }

    /// Backend output for a job. Empty until the backend has accepted it.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<u8>, EngineError> {
        let job = self.registry.get(&JobId::new(id))?;
        let Some(handle) = job.backend_handle else {
            return Ok(Vec::new());
        };
        self.backend.fetch_logs(&handle).await.map_err(|e| EngineError::Backend(e.to_string()))
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.registry.list(filter).collect()
    }

    pub async fn cancel_job(&self, id: &str) -> Result<CancelOutcome, EngineError> {
        self.scheduler.cancel(&JobId::new(id)).await
    }

    pub async fn acknowledge_job(&self, id: &str) -> Result<CleanupOutcome, EngineError> {
        self.reaper.acknowledge(&JobId::new(id)).await
    }

    pub fn register_deployment(&self, spec: DeploymentSpec) -> Result<Deployment, EngineError> {
        self.drift.register(spec)
    }

    pub fn remove_deployment(&self, id: &str) -> Result<Deployment, EngineError> {
        self.drift.remove(&DeploymentId::new(id))
    }

    pub fn deployment_status(&self, id: &str) -> Result<Deployment, EngineError> {
        self.drift.status(&DeploymentId::new(id))
    }

    pub fn list_deployments(&self) -> Vec<Deployment> {
        self.drift.list()
    }

    pub fn stream_health(&self) -> StreamHealth {
        self.publisher.health()
    }

    pub fn health(&self) -> HealthDetail {
        let stats = self.scheduler.stats();
        let now = self.registry.clock().epoch_ms();
        HealthDetail {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_ms: now.saturating_sub(self.started_at_ms),
            concurrency: stats.concurrency,
            tokens_available: stats.tokens_available,
            queued: stats.queued,
            deployments: self.drift.len(),
            stream: self.publisher.health(),
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Applies control-plane commands to the scheduler and drift loop.
pub struct CommandRouter<C: Clock> {
    scheduler: Scheduler<C>,
    drift: DriftLoop<C>,
}

impl<C: Clock> CommandRouter<C> {
    pub fn new(scheduler: Scheduler<C>, drift: DriftLoop<C>) -> Self {
        Self { scheduler, drift }
    }

    /// Current state of every job and deployment, as stream events.
    fn snapshot(&self) -> Vec<OutboundEvent> {
        let jobs = self.scheduler.registry().list(&JobFilter::all()).map(|job| {
            OutboundEvent::JobStatusDelta { job_id: job.id, state: job.state, detail: job.detail }
        });
        let deployments = self.drift.list().into_iter().map(|d| {
            OutboundEvent::DriftNotification { deployment_id: d.id, status: d.status }
        });
        jobs.chain(deployments).collect()
    }
}

impl<C: Clock> CommandHandler for CommandRouter<C> {
    fn handle(&self, command: &CommandKind) -> Result<Vec<OutboundEvent>, EngineError> {
        match command {
            CommandKind::CancelJob { job_id } => {
                let job = self.scheduler.registry().get(job_id)?;
                if job.is_terminal() {
                    return Err(EngineError::AlreadyTerminal { id: job.id, state: job.state });
                }
                self.scheduler.request_cancel(job_id)?;
                Ok(Vec::new())
            }
            CommandKind::UpdateInterval { deployment_id, interval_ms } => {
                self.drift.update_interval(deployment_id, Duration::from_millis(*interval_ms))?;
                Ok(Vec::new())
            }
            CommandKind::Resync => Ok(self.snapshot()),
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
