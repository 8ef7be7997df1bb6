// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `batch/v1` Job and payload ConfigMap construction.

use crate::naming::{label_value, object_name};
use k8s_openapi::api::batch::v1::{Job, JobSpec as K8sJobSpec, JobStatus};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvFromSource, EnvVar, Pod, PodSpec,
    PodTemplateSpec, SecretEnvSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use outpost_core::{CredentialRef, JobId, JobSpec};
use std::collections::BTreeMap;

pub(super) const APP_LABEL: &str = "outpost-job";
pub(super) const CONTAINER_NAME: &str = "job";
pub(super) const PAYLOAD_MOUNT: &str = "/outpost/payload";
const PAYLOAD_KEY: &str = "payload";
const JOB_ID_KEY: &str = "outpost.dev/job-id";

/// Job names double as the `job-name` pod label, so stay below 63 with room
/// for the `-payload` suffix.
const MAX_JOB_NAME: usize = 54;

pub(super) fn job_name(job_id: &JobId) -> String {
    object_name("outpost-", job_id.as_str(), MAX_JOB_NAME)
}

pub(super) fn payload_name(job_name: &str) -> String {
    format!("{job_name}-payload")
}

/// Parameters for building a Kubernetes Job.
pub(super) struct JobParams<'a> {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub job_id: &'a JobId,
    pub spec: &'a JobSpec,
    pub credential: Option<&'a CredentialRef>,
    pub service_account: Option<String>,
    pub active_deadline_secs: Option<i64>,
}

fn labels(job_id: &JobId, spec: &JobSpec) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        ("app".to_string(), APP_LABEL.to_string()),
        (JOB_ID_KEY.to_string(), label_value(job_id.as_str())),
        ("outpost.dev/kind".to_string(), spec.kind.to_string()),
    ]);
    if let Some(dep) = &spec.deployment {
        labels.insert("outpost.dev/deployment".to_string(), label_value(dep.as_str()));
    }
    labels
}

fn metadata(name: &str, namespace: &str, job_id: &JobId, spec: &JobSpec) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(job_id, spec)),
        annotations: Some(BTreeMap::from([(JOB_ID_KEY.to_string(), job_id.to_string())])),
        ..Default::default()
    }
}

/// ConfigMap holding the opaque payload, or `None` when there is none.
pub(super) fn build_payload(params: &JobParams<'_>) -> Option<ConfigMap> {
    if params.spec.payload.is_empty() {
        return None;
    }
    Some(ConfigMap {
        metadata: metadata(
            &payload_name(&params.name),
            &params.namespace,
            params.job_id,
            params.spec,
        ),
        binary_data: Some(BTreeMap::from([(
            PAYLOAD_KEY.to_string(),
            ByteString(params.spec.payload.clone()),
        )])),
        ..Default::default()
    })
}

/// Build a run-once Job: no retries, never restarted, cleaned by the reaper.
pub(super) fn build_job(params: &JobParams<'_>) -> Job {
    let spec = params.spec;

    let mut env = vec![
        env_var("OUTPOST_JOB_ID", params.job_id.as_str()),
        env_var("OUTPOST_JOB_KIND", spec.kind.as_str()),
    ];
    if let Some(dep) = &spec.deployment {
        env.push(env_var("OUTPOST_DEPLOYMENT", dep.as_str()));
    }
    env.extend(spec.env.iter().map(|(k, v)| env_var(k, v)));

    let env_from = params.credential.map(|cred| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource { name: cred.0.clone(), optional: Some(false) }),
            ..Default::default()
        }]
    });

    let (volumes, volume_mounts) = if spec.payload.is_empty() {
        (None, None)
    } else {
        env.push(env_var("OUTPOST_PAYLOAD", &format!("{PAYLOAD_MOUNT}/{PAYLOAD_KEY}")));
        (
            Some(vec![Volume {
                name: "payload".to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: payload_name(&params.name),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: "payload".to_string(),
                mount_path: PAYLOAD_MOUNT.to_string(),
                read_only: Some(true),
                ..Default::default()
            }]),
        )
    };

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(params.image.clone()),
        command: Some(spec.command.clone()),
        env: Some(env),
        env_from,
        volume_mounts,
        ..Default::default()
    };

    Job {
        metadata: metadata(&params.name, &params.namespace, params.job_id, spec),
        spec: Some(K8sJobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: params.active_deadline_secs,
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(params.job_id, spec)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    restart_policy: Some("Never".to_string()),
                    service_account_name: params.service_account.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar { name: name.to_string(), value: Some(value.to_string()), ..Default::default() }
}

/// Coarse phase of a Job as seen through its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum JobPhase {
    Pending,
    Active,
    Complete,
    Failed(Option<String>),
}

impl JobPhase {
    pub fn label(&self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Active => "running",
            JobPhase::Complete => "complete",
            JobPhase::Failed(_) => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobPhase::Complete | JobPhase::Failed(_))
    }
}

pub(super) fn job_phase(status: Option<&JobStatus>) -> JobPhase {
    let Some(status) = status else {
        return JobPhase::Pending;
    };
    let condition = |kind: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .find(|c| c.type_ == kind && c.status == "True")
    };
    if let Some(failed) = condition("Failed") {
        return JobPhase::Failed(failed.message.clone().or_else(|| failed.reason.clone()));
    }
    if condition("Complete").is_some() || status.succeeded.unwrap_or(0) > 0 {
        return JobPhase::Complete;
    }
    if status.failed.unwrap_or(0) > 0 {
        return JobPhase::Failed(None);
    }
    if status.active.unwrap_or(0) > 0 {
        JobPhase::Active
    } else {
        JobPhase::Pending
    }
}

/// Exit code and termination message of the job container, once terminated.
pub(super) fn terminated_exit(pod: &Pod) -> Option<(i32, Option<String>)> {
    pod.status
        .as_ref()?
        .container_statuses
        .iter()
        .flatten()
        .find(|s| s.name == CONTAINER_NAME)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|t| (t.exit_code, t.message.clone().or_else(|| t.reason.clone())))
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
