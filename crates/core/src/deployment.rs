// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deployments watched for drift.

use crate::id::is_valid_id;
use crate::job::{CredentialRef, JobId, JobKind};
use crate::request::{validate_command, JobRequest, SpecLimits, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

crate::define_id! {
    /// Identifier of a deployment (one managed infrastructure stack).
    pub struct DeploymentId("dep-");
}

/// Result of the most recent drift check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriftStatus {
    Unknown,
    InSync,
    Drifted,
    CheckFailed,
}

crate::simple_display! {
    DriftStatus {
        Unknown => "unknown",
        InSync => "in-sync",
        Drifted => "drifted",
        CheckFailed => "check-failed",
    }
}

/// Registration request for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub id: String,
    /// Detection interval in milliseconds.
    pub interval_ms: u64,
    /// Per-deployment jitter override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<u64>,
    /// Plan command run by each drift check.
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl DeploymentSpec {
    pub fn new(id: impl Into<String>, interval: Duration, command: Vec<String>) -> Self {
        Self {
            id: id.into(),
            interval_ms: interval.as_millis() as u64,
            jitter_ms: None,
            command,
            env: BTreeMap::new(),
            payload: Vec::new(),
        }
    }

    /// Validate into a fresh deployment record with status `unknown`.
    pub fn validate(self, limits: &SpecLimits) -> Result<Deployment, ValidationError> {
        if !is_valid_id(&self.id) {
            return Err(ValidationError::InvalidDeploymentId(self.id));
        }
        if self.interval_ms == 0 {
            return Err(ValidationError::ZeroInterval);
        }
        validate_command(&self.command, &self.env, &self.payload, limits)?;
        Ok(Deployment {
            id: DeploymentId::new(self.id),
            interval: Duration::from_millis(self.interval_ms),
            jitter: self.jitter_ms.map(Duration::from_millis),
            command: self.command,
            env: self.env,
            payload: self.payload,
            credential: None,
            last_check_ms: None,
            status: DriftStatus::Unknown,
            last_conclusive: DriftStatus::Unknown,
            in_flight: None,
            checks_started: 0,
        })
    }
}

/// A deployment record owned by the drift loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    #[serde(default, with = "opt_duration_ms")]
    pub jitter: Option<Duration>,
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Vec<u8>,
    /// Lease held by the most recent check, until that check is reaped.
    #[serde(default)]
    pub credential: Option<CredentialRef>,
    #[serde(default)]
    pub last_check_ms: Option<u64>,
    pub status: DriftStatus,
    /// Last `in-sync`/`drifted` verdict, kept when a check fails.
    pub last_conclusive: DriftStatus,
    #[serde(default)]
    pub in_flight: Option<JobId>,
    #[serde(default)]
    pub checks_started: u64,
}

impl Deployment {
    /// Build the `plan-only` request a drift check submits.
    pub fn plan_request(&self) -> JobRequest {
        JobRequest::new(JobKind::PlanOnly.as_str(), self.command.clone())
            .deployment(self.id.to_string())
            .env(self.env.clone())
            .payload(self.payload.clone())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> DeploymentSpec {
        DeploymentSpec::new("prod-eu", Duration::from_secs(60), vec!["tofu".into(), "plan".into()])
    }

    #[test]
    fn validate_starts_unknown() {
        let dep = spec().validate(&SpecLimits::default()).unwrap();
        assert_eq!(dep.status, DriftStatus::Unknown);
        assert_eq!(dep.last_conclusive, DriftStatus::Unknown);
        assert_eq!(dep.interval, Duration::from_secs(60));
        assert!(dep.in_flight.is_none());
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut spec = spec();
        spec.interval_ms = 0;
        assert_eq!(spec.validate(&SpecLimits::default()).unwrap_err(), ValidationError::ZeroInterval);
    }

    #[test]
    fn validate_rejects_bad_id() {
        let mut spec = spec();
        spec.id = "no spaces".into();
        assert!(matches!(
            spec.validate(&SpecLimits::default()),
            Err(ValidationError::InvalidDeploymentId(_))
        ));
    }

    #[test]
    fn plan_request_validates_as_plan_only() {
        let dep = spec().validate(&SpecLimits::default()).unwrap();
        let (_, job_spec) = dep.plan_request().validate(&SpecLimits::default()).unwrap();
        assert_eq!(job_spec.kind, JobKind::PlanOnly);
        assert_eq!(job_spec.deployment, Some(dep.id.clone()));
    }

    #[test]
    fn record_serializes_interval_as_millis() {
        let dep = spec().validate(&SpecLimits::default()).unwrap();
        let json = serde_json::to_value(&dep).unwrap();
        assert_eq!(json["interval"], 60_000);
        assert_eq!(json["status"], "unknown");
        let back: Deployment = serde_json::from_value(json).unwrap();
        assert_eq!(back, dep);
    }
}
