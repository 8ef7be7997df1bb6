// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters for the agent's external collaborators.
//!
//! - [`JobBackend`]: runs job workloads (Kubernetes `batch/v1` Jobs)
//! - [`SecretProvider`]: leases per-job deployment credentials
//! - [`MetricsSink`]: receives counters, gauges, and job spans

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod backend;
mod naming;
pub mod metrics;
pub mod secret;

pub use backend::{
    BackendError, JobBackend, JobSubmission, KubernetesBackend, KubernetesConfig, Progress,
    TerminalOutcome, WatchEvent, WatchStream,
};
pub use metrics::{JobSpan, Metric, MetricsSink, TracingMetricsSink};
pub use secret::{KubeSecretProvider, SecretError, SecretProvider};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use backend::{BackendCall, CancelBehavior, FakeJobBackend};
#[cfg(any(test, feature = "test-support"))]
pub use metrics::{FakeMetricsSink, RecordedMetric};
#[cfg(any(test, feature = "test-support"))]
pub use secret::{FakeSecretProvider, SecretCall};
