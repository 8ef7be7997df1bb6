// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Metrics sink: counters, gauges, and one span per finished job.

use outpost_core::{JobId, JobKind, JobState};

/// One metric update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Counter { name: &'static str, delta: u64 },
    Gauge { name: &'static str, value: u64 },
}

/// Summary of a finished job, emitted as a `job.run` span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpan {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub duration_ms: u64,
    pub forced_cancel: bool,
}

/// Receiver of metric updates. Implementations must not block.
pub trait MetricsSink: Send + Sync + 'static {
    fn emit(&self, metric: Metric);
    fn span(&self, span: &JobSpan);
}

/// Default sink: structured tracing events under the `outpost::metrics` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, metric: Metric) {
        match metric {
            Metric::Counter { name, delta } => {
                tracing::debug!(target: "outpost::metrics", metric = name, delta, "counter")
            }
            Metric::Gauge { name, value } => {
                tracing::debug!(target: "outpost::metrics", metric = name, value, "gauge")
            }
        }
    }

    fn span(&self, span: &JobSpan) {
        let s = tracing::info_span!(
            target: "outpost::metrics",
            "job.run",
            job_id = %span.job_id,
            kind = %span.kind,
        );
        let _guard = s.enter();
        tracing::info!(
            target: "outpost::metrics",
            state = %span.state,
            duration_ms = span.duration_ms,
            forced_cancel = span.forced_cancel,
            "job finished"
        );
    }
}

#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(coverage_nightly, coverage(off))]
mod fake {
    use super::{JobSpan, Metric, MetricsSink};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Recorded sink call
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum RecordedMetric {
        Metric(Metric),
        Span(JobSpan),
    }

    /// Fake metrics sink for testing
    #[derive(Clone, Default)]
    pub struct FakeMetricsSink {
        inner: Arc<Mutex<Vec<RecordedMetric>>>,
    }

    impl FakeMetricsSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn recorded(&self) -> Vec<RecordedMetric> {
            self.inner.lock().clone()
        }

        /// Sum of all deltas recorded for counter `name`.
        pub fn counter(&self, name: &str) -> u64 {
            self.inner
                .lock()
                .iter()
                .filter_map(|r| match r {
                    RecordedMetric::Metric(Metric::Counter { name: n, delta }) if *n == name => {
                        Some(*delta)
                    }
                    _ => None,
                })
                .sum()
        }

        /// Last value recorded for gauge `name`.
        pub fn gauge(&self, name: &str) -> Option<u64> {
            self.inner.lock().iter().rev().find_map(|r| match r {
                RecordedMetric::Metric(Metric::Gauge { name: n, value }) if *n == name => {
                    Some(*value)
                }
                _ => None,
            })
        }

        pub fn spans(&self) -> Vec<JobSpan> {
            self.inner
                .lock()
                .iter()
                .filter_map(|r| match r {
                    RecordedMetric::Span(s) => Some(s.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl MetricsSink for FakeMetricsSink {
        fn emit(&self, metric: Metric) {
            self.inner.lock().push(RecordedMetric::Metric(metric));
        }

        fn span(&self, span: &JobSpan) {
            self.inner.lock().push(RecordedMetric::Span(span.clone()));
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeMetricsSink, RecordedMetric};
