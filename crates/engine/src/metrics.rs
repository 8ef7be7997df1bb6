// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-side counters, mirrored to the configured [`MetricsSink`].

use outpost_adapters::{JobSpan, Metric, MetricsSink};
use outpost_core::{Job, JobState, MetricsSnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const JOBS_SUBMITTED: &str = "jobs_submitted";
pub const JOBS_SUCCEEDED: &str = "jobs_succeeded";
pub const JOBS_FAILED: &str = "jobs_failed";
pub const JOBS_CANCELLED: &str = "jobs_cancelled";
pub const DRIFT_DETECTED: &str = "drift_detected";
pub const LOG_CHUNKS_DROPPED: &str = "log_chunks_dropped";
pub const ACTIVE_JOBS: &str = "active_jobs";
pub const ACTIVE_STREAM_SESSIONS: &str = "active_stream_sessions";

/// Agent metrics. Cheap to call from any task.
pub struct Metrics {
    sink: Arc<dyn MetricsSink>,
    jobs_submitted: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    drift_detected: AtomicU64,
    log_chunks_dropped: AtomicU64,
    active_jobs: AtomicU64,
    active_stream_sessions: AtomicU64,
}

impl Metrics {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            sink,
            jobs_submitted: AtomicU64::new(0),
            jobs_succeeded: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            drift_detected: AtomicU64::new(0),
            log_chunks_dropped: AtomicU64::new(0),
            active_jobs: AtomicU64::new(0),
            active_stream_sessions: AtomicU64::new(0),
        }
    }

    fn count(&self, counter: &AtomicU64, name: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.sink.emit(Metric::Counter { name, delta: 1 });
    }

    fn gauge(&self, gauge: &AtomicU64, name: &'static str, value: u64) {
        gauge.store(value, Ordering::Relaxed);
        self.sink.emit(Metric::Gauge { name, value });
    }

    pub fn job_submitted(&self) {
        self.count(&self.jobs_submitted, JOBS_SUBMITTED);
    }

    /// Count a job that reached a terminal state and emit its `job.run` span.
    pub fn job_finished(&self, job: &Job) {
        match job.state {
            JobState::Succeeded => self.count(&self.jobs_succeeded, JOBS_SUCCEEDED),
            JobState::Failed => self.count(&self.jobs_failed, JOBS_FAILED),
            JobState::Cancelled => self.count(&self.jobs_cancelled, JOBS_CANCELLED),
            _ => return,
        }
        self.sink.span(&JobSpan {
            job_id: job.id.clone(),
            kind: job.spec.kind,
            state: job.state,
            duration_ms: job.transitioned_at_ms.saturating_sub(job.created_at_ms),
            forced_cancel: job.forced_cancel,
        });
    }

    pub fn drift_detected(&self) {
        self.count(&self.drift_detected, DRIFT_DETECTED);
    }

    pub fn log_chunk_dropped(&self) {
        self.count(&self.log_chunks_dropped, LOG_CHUNKS_DROPPED);
    }

    pub fn set_active_jobs(&self, value: usize) {
        self.gauge(&self.active_jobs, ACTIVE_JOBS, value as u64);
    }

    pub fn set_stream_connected(&self, connected: bool) {
        self.gauge(&self.active_stream_sessions, ACTIVE_STREAM_SESSIONS, u64::from(connected));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            drift_detected: self.drift_detected.load(Ordering::Relaxed),
            log_chunks_dropped: self.log_chunks_dropped.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            active_stream_sessions: self.active_stream_sessions.load(Ordering::Relaxed),
        }
    }
}
