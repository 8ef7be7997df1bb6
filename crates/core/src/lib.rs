// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! outpost-core: data model for the outpost infrastructure job agent

pub mod macros;

pub mod clock;
pub mod deployment;
pub mod id;
pub mod job;
pub mod metrics;
pub mod request;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use deployment::{Deployment, DeploymentId, DeploymentSpec, DriftStatus};
pub use id::{is_valid_id, short};
pub use job::{
    BackendHandle, CredentialRef, ExitClass, FailureReason, Job, JobFilter, JobId, JobKind, JobResult,
    JobSpec, JobState, TransitionDetails, TransitionError, TransitionRecord,
};
pub use metrics::MetricsSnapshot;
pub use request::{JobRequest, SpecLimits, ValidationError};
