// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{DeploymentSpec, JobRequest};
use std::time::Duration;

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies for core state machine types.
pub mod strategies {
    use crate::job::{ExitClass, JobKind, JobState};
    use proptest::prelude::*;

    pub fn arb_job_state() -> impl Strategy<Value = JobState> {
        proptest::sample::select(JobState::ALL.to_vec())
    }

    pub fn arb_job_kind() -> impl Strategy<Value = JobKind> {
        proptest::sample::select(JobKind::ALL.to_vec())
    }

    pub fn arb_exit_class() -> impl Strategy<Value = ExitClass> {
        prop_oneof![Just(ExitClass::Clean), Just(ExitClass::Changed), Just(ExitClass::Error)]
    }
}

// ── Request fixtures ─────────────────────────────────────────────────────

pub fn apply_request(id: &str) -> JobRequest {
    JobRequest::new("apply", vec!["tofu".to_string(), "apply".to_string()]).id(id)
}

pub fn plan_request(deployment: &str) -> JobRequest {
    JobRequest::new("plan-only", vec!["tofu".to_string(), "plan".to_string()])
        .deployment(deployment)
}

pub fn deployment_spec(id: &str, interval: Duration) -> DeploymentSpec {
    DeploymentSpec::new(
        id,
        interval,
        vec!["tofu".to_string(), "plan".to_string(), "-detailed-exitcode".to_string()],
    )
}
