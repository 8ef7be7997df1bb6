// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::config::EngineConfig;
use crate::metrics::Metrics;
use crate::registry::JobRegistry;
use crate::scheduler::Scheduler;
use crate::session::{self, Outbound, Publisher};
use outpost_adapters::{FakeJobBackend, FakeMetricsSink, FakeSecretProvider};
use outpost_core::{FakeClock, JobId, JobState};
use outpost_wire::{OutboundEvent, Pressure, StreamHealth};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) struct TestEngine {
    pub clock: FakeClock,
    pub registry: Arc<JobRegistry<FakeClock>>,
    pub scheduler: Scheduler<FakeClock>,
    pub backend: FakeJobBackend,
    pub secrets: FakeSecretProvider,
    pub sink: FakeMetricsSink,
    pub metrics: Arc<Metrics>,
    pub publisher: Publisher,
    pub outbound: Outbound,
    pub shutdown: CancellationToken,
}

impl TestEngine {
    pub fn start(config: EngineConfig) -> Self {
        let clock = FakeClock::new();
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let backend = FakeJobBackend::new();
        let secrets = FakeSecretProvider::new();
        let sink = FakeMetricsSink::new();
        let metrics = Arc::new(Metrics::new(Arc::new(sink.clone())));
        let (publisher, outbound) = session::channel(4096, Arc::clone(&metrics));
        let shutdown = CancellationToken::new();
        let scheduler = Scheduler::start(
            Arc::clone(&registry),
            Arc::new(backend.clone()),
            Arc::new(secrets.clone()),
            Arc::clone(&metrics),
            publisher.clone(),
            &config,
            shutdown.clone(),
        );
        Self {
            clock,
            registry,
            scheduler,
            backend,
            secrets,
            sink,
            metrics,
            publisher,
            outbound,
            shutdown,
        }
    }

    pub fn state(&self, id: &JobId) -> JobState {
        self.registry.get(id).map(|j| j.state).unwrap_or_else(|e| panic!("{e}"))
    }

    /// Every event published so far, in order.
    pub fn drain_events(&mut self) -> Vec<OutboundEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound.rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// States published for `id`, in order.
    pub fn published_states(events: &[OutboundEvent], id: &JobId) -> Vec<JobState> {
        events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::JobStatusDelta { job_id, state, .. } if job_id == id => Some(*state),
                _ => None,
            })
            .collect()
    }

    pub fn set_pressure(&self, pressure: Pressure) {
        self.outbound.health.send_replace(StreamHealth { pressure, ..StreamHealth::default() });
    }
}

impl Drop for TestEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub(crate) fn config(concurrency: usize) -> EngineConfig {
    EngineConfig { concurrency, ..EngineConfig::default() }
}

/// Let spawned tasks run until they block. Uses paused time.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
