// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes backend: one `batch/v1` Job per outpost job.
//!
//! # Module layout
//!
//! - [`job`]: Job / ConfigMap construction and status interpretation
//!
//! The opaque payload rides in a ConfigMap mounted into the pod. Progress is
//! observed by polling the Job status and the pod's logs; the exit code of
//! the job container decides the outcome. Handles are `<namespace>/<name>`.

mod job;

use super::{
    BackendError, JobBackend, JobSubmission, Progress, TerminalOutcome, WatchEvent, WatchStream,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use job::{JobParams, JobPhase};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::Client;
use outpost_core::{BackendHandle, ExitClass};
use std::collections::VecDeque;
use std::time::Duration;

/// Settings for [`KubernetesBackend`].
#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub namespace: String,
    pub image: String,
    pub service_account: Option<String>,
    /// Hard runtime limit enforced by Kubernetes.
    pub active_deadline: Option<Duration>,
    pub poll_interval: Duration,
    /// Consecutive API errors tolerated while watching before giving up.
    pub max_poll_errors: u32,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            image: "ghcr.io/opentofu/opentofu:latest".to_string(),
            service_account: None,
            active_deadline: None,
            poll_interval: Duration::from_secs(2),
            max_poll_errors: 5,
        }
    }
}

/// Job backend that runs workloads as Kubernetes Jobs.
#[derive(Clone)]
pub struct KubernetesBackend {
    client: Client,
    config: KubernetesConfig,
}

impl KubernetesBackend {
    pub fn new(client: Client, config: KubernetesConfig) -> Self {
        Self { client, config }
    }

    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn try_default(config: KubernetesConfig) -> Result<Self, BackendError> {
        let client = Client::try_default().await.map_err(|e| {
            BackendError::Unavailable(format!("failed to create kube client: {}", e))
        })?;
        Ok(Self::new(client, config))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn parse_handle(handle: &BackendHandle) -> Result<(&str, &str), BackendError> {
    handle
        .0
        .split_once('/')
        .filter(|(ns, name)| !ns.is_empty() && !name.is_empty())
        .ok_or_else(|| BackendError::NotFound(format!("malformed handle '{}'", handle)))
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}

fn unavailable(what: &str, e: kube::Error) -> BackendError {
    BackendError::Unavailable(format!("{}: {}", what, e))
}

/// Newest pod created for a Job.
async fn job_pod(pods: &Api<Pod>, job_name: &str) -> Result<Option<Pod>, kube::Error> {
    let lp = ListParams::default().labels(&format!("job-name={}", job_name));
    let list = pods.list(&lp).await?;
    Ok(list.items.into_iter().max_by_key(|p| p.metadata.creation_timestamp.as_ref().map(|t| t.0)))
}

async fn delete_ignoring_missing<K>(api: &Api<K>, name: &str) -> Result<(), kube::Error>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::background()).await {
        Ok(_) => Ok(()),
        Err(e) if is_not_found(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl JobBackend for KubernetesBackend {
    async fn submit(&self, submission: &JobSubmission) -> Result<BackendHandle, BackendError> {
        let namespace = self.config.namespace.clone();
        let params = JobParams {
            name: job::job_name(&submission.job_id),
            namespace: namespace.clone(),
            image: self.config.image.clone(),
            job_id: &submission.job_id,
            spec: &submission.spec,
            credential: submission.credential.as_ref(),
            service_account: self.config.service_account.clone(),
            active_deadline_secs: self.config.active_deadline.map(|d| d.as_secs() as i64),
        };
        let pp = PostParams::default();

        tracing::info!(
            job_id = %submission.job_id,
            name = %params.name,
            %namespace,
            "creating Kubernetes job"
        );

        let config_maps = self.config_maps(&namespace);
        let payload = job::build_payload(&params);
        if let Some(cm) = &payload {
            config_maps
                .create(&pp, cm)
                .await
                .map_err(|e| BackendError::Rejected(format!("payload config map: {}", e)))?;
        }

        if let Err(e) = self.jobs(&namespace).create(&pp, &job::build_job(&params)).await {
            // The payload must not outlive a job that was never created.
            if payload.is_some() {
                let cm_name = job::payload_name(&params.name);
                if let Err(del_err) = delete_ignoring_missing(&config_maps, &cm_name).await {
                    tracing::warn!(%cm_name, error = %del_err, "failed to clean up payload");
                }
            }
            return Err(match e {
                kube::Error::Api(resp) if resp.code == 409 => {
                    BackendError::Rejected(format!("job {} already exists", params.name))
                }
                kube::Error::Api(resp) => BackendError::Rejected(resp.message),
                other => unavailable("job creation failed", other),
            });
        }

        Ok(BackendHandle(format!("{}/{}", namespace, params.name)))
    }

    async fn watch(&self, handle: &BackendHandle) -> Result<WatchStream, BackendError> {
        let (namespace, name) = parse_handle(handle)?;
        let jobs = self.jobs(namespace);
        match jobs.get_opt(name).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(BackendError::NotFound(handle.to_string())),
            Err(e) => return Err(unavailable("job lookup failed", e)),
        }

        let watcher = Watcher {
            jobs,
            pods: self.pods(namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
            poll_interval: self.config.poll_interval,
            max_errors: self.config.max_poll_errors,
            errors: 0,
            polls: 0,
            last_phase: None,
            log_offset: 0,
            pending: VecDeque::new(),
            done: false,
        };

        Ok(futures_util::stream::unfold(watcher, |mut w| async move {
            loop {
                if let Some(event) = w.pending.pop_front() {
                    return Some((event, w));
                }
                if w.done {
                    return None;
                }
                w.poll().await;
            }
        })
        .boxed())
    }

    async fn cancel(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let (namespace, name) = parse_handle(handle)?;
        tracing::info!(%handle, "cancelling Kubernetes job");
        delete_ignoring_missing(&self.jobs(namespace), name)
            .await
            .map_err(|e| unavailable("job deletion failed", e))
    }

    async fn teardown(&self, handle: &BackendHandle) -> Result<(), BackendError> {
        let (namespace, name) = parse_handle(handle)?;
        delete_ignoring_missing(&self.jobs(namespace), name)
            .await
            .map_err(|e| unavailable("job deletion failed", e))?;
        delete_ignoring_missing(&self.config_maps(namespace), &job::payload_name(name))
            .await
            .map_err(|e| unavailable("payload deletion failed", e))?;
        tracing::debug!(%handle, "Kubernetes job torn down");
        Ok(())
    }

    async fn fetch_logs(&self, handle: &BackendHandle) -> Result<Vec<u8>, BackendError> {
        let (namespace, name) = parse_handle(handle)?;
        let pods = self.pods(namespace);
        let pod = job_pod(&pods, name)
            .await
            .map_err(|e| unavailable("pod lookup failed", e))?
            .and_then(|p| p.metadata.name)
            .ok_or_else(|| BackendError::NotFound(format!("no pod for {}", handle)))?;
        let lp = LogParams { container: Some(job::CONTAINER_NAME.to_string()), ..Default::default() };
        pods.logs(&pod, &lp)
            .await
            .map(String::into_bytes)
            .map_err(|e| unavailable("log fetch failed", e))
    }
}

/// Polling state behind a watch stream.
struct Watcher {
    jobs: Api<Job>,
    pods: Api<Pod>,
    namespace: String,
    name: String,
    poll_interval: Duration,
    max_errors: u32,
    errors: u32,
    polls: u64,
    last_phase: Option<&'static str>,
    log_offset: usize,
    pending: VecDeque<WatchEvent>,
    done: bool,
}

impl Watcher {
    async fn poll(&mut self) {
        if self.polls > 0 {
            tokio::time::sleep(self.poll_interval).await;
        }
        self.polls += 1;

        let job = match self.jobs.get_opt(&self.name).await {
            Ok(Some(job)) => {
                self.errors = 0;
                job
            }
            Ok(None) => {
                tracing::warn!(name = %self.name, "job disappeared while watching");
                self.done = true;
                return;
            }
            Err(e) => {
                self.errors += 1;
                tracing::debug!(name = %self.name, error = %e, attempt = self.errors, "job poll failed");
                if self.errors >= self.max_errors {
                    self.done = true;
                }
                return;
            }
        };

        let phase = job::job_phase(job.status.as_ref());
        if self.last_phase != Some(phase.label()) {
            self.last_phase = Some(phase.label());
            self.pending.push_back(WatchEvent::Progress(Progress::Phase(phase.label().to_string())));
        }

        let pod = match job_pod(&self.pods, &self.name).await {
            Ok(pod) => pod,
            Err(e) => {
                tracing::debug!(name = %self.name, error = %e, "pod lookup failed");
                None
            }
        };

        if let Some(pod_name) = pod.as_ref().and_then(|p| p.metadata.name.clone()) {
            self.collect_logs(&pod_name).await;
        }

        if phase.is_finished() {
            self.pending.push_back(WatchEvent::Terminal(self.outcome(&phase, pod.as_ref())));
            self.done = true;
        }
    }

    async fn collect_logs(&mut self, pod_name: &str) {
        let lp = LogParams { container: Some(job::CONTAINER_NAME.to_string()), ..Default::default() };
        // Pending pods have no logs yet.
        let Ok(logs) = self.pods.logs(pod_name, &lp).await else {
            return;
        };
        let bytes = logs.into_bytes();
        if bytes.len() > self.log_offset {
            let chunk = bytes[self.log_offset..].to_vec();
            self.log_offset = bytes.len();
            self.pending.push_back(WatchEvent::Progress(Progress::Log(chunk)));
        }
    }

    fn outcome(&self, phase: &JobPhase, pod: Option<&Pod>) -> TerminalOutcome {
        let output_ref = pod
            .and_then(|p| p.metadata.name.as_ref())
            .map(|pod| format!("k8s://{}/pods/{}", self.namespace, pod));
        if let Some((code, message)) = pod.and_then(job::terminated_exit) {
            return TerminalOutcome { output_ref, message, ..TerminalOutcome::from_exit_code(code) };
        }
        // No container status (deadline exceeded before start, pod evicted).
        match phase {
            JobPhase::Complete => TerminalOutcome {
                exit: ExitClass::Clean,
                exit_code: None,
                output_ref,
                message: None,
            },
            JobPhase::Failed(message) => TerminalOutcome {
                exit: ExitClass::Error,
                exit_code: None,
                output_ref,
                message: message.clone(),
            },
            JobPhase::Pending | JobPhase::Active => TerminalOutcome {
                exit: ExitClass::Error,
                exit_code: None,
                output_ref,
                message: Some("job ended without a terminal phase".to_string()),
            },
        }
    }
}
