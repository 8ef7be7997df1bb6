// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes Secret leases.
//!
//! Each deployment keeps its long-lived credentials in
//! `outpost-credentials-<deployment>`. A lease is a short-lived copy owned by
//! one job, so revoking a job's access never touches the source secret.

use super::{SecretError, SecretProvider};
use crate::naming::{label_value, object_name};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use outpost_core::{CredentialRef, DeploymentId};
use std::collections::BTreeMap;

const SOURCE_PREFIX: &str = "outpost-credentials-";
const LEASE_PREFIX: &str = "outpost-lease-";
const LEASE_LABEL: &str = "outpost-lease";

#[derive(Clone)]
pub struct KubeSecretProvider {
    client: Client,
    namespace: String,
}

impl KubeSecretProvider {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self { client, namespace: namespace.into() }
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

pub(super) fn source_name(deployment: &DeploymentId) -> String {
    object_name(SOURCE_PREFIX, deployment.as_str(), 253)
}

pub(super) fn lease_name(deployment: &DeploymentId, nonce: &str) -> String {
    // 63 keeps lease names usable as label values too.
    let base = object_name(LEASE_PREFIX, deployment.as_str(), 63 - nonce.len() - 1);
    format!("{base}-{nonce}")
}

pub(super) fn build_lease(
    source: &Secret,
    name: &str,
    namespace: &str,
    deployment: &DeploymentId,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                ("app".to_string(), LEASE_LABEL.to_string()),
                ("outpost.dev/deployment".to_string(), label_value(deployment.as_str())),
            ])),
            ..Default::default()
        },
        data: source.data.clone(),
        string_data: source.string_data.clone(),
        type_: source.type_.clone(),
        ..Default::default()
    }
}

#[async_trait]
impl SecretProvider for KubeSecretProvider {
    async fn lease(&self, deployment: &DeploymentId) -> Result<CredentialRef, SecretError> {
        let secrets = self.secrets();
        let source_name = source_name(deployment);
        let source = match secrets.get_opt(&source_name).await {
            Ok(Some(secret)) => secret,
            Ok(None) => return Err(SecretError::NotFound(deployment.to_string())),
            Err(e) => return Err(SecretError::Unavailable(format!("{}: {}", source_name, e))),
        };

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let name = lease_name(deployment, &nonce[..8]);
        let lease = build_lease(&source, &name, &self.namespace, deployment);
        secrets
            .create(&PostParams::default(), &lease)
            .await
            .map_err(|e| SecretError::Unavailable(format!("lease creation failed: {}", e)))?;

        tracing::info!(%deployment, lease = %name, "credential leased");
        Ok(CredentialRef(name))
    }

    async fn release(&self, credential: &CredentialRef) -> Result<(), SecretError> {
        match self.secrets().delete(&credential.0, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::debug!(lease = %credential, "credential released");
                Ok(())
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(SecretError::Unavailable(format!("release {}: {}", credential, e))),
        }
    }
}
