// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential leasing for deployment-scoped jobs.

mod k8s;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSecretProvider, SecretCall};

pub use k8s::KubeSecretProvider;

use async_trait::async_trait;
use outpost_core::{CredentialRef, DeploymentId};
use thiserror::Error;

/// Errors from secret provider operations
#[derive(Debug, Clone, Error)]
pub enum SecretError {
    #[error("no credentials for deployment {0}")]
    NotFound(String),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Adapter for leasing deployment credentials
#[async_trait]
pub trait SecretProvider: Send + Sync + 'static {
    /// Lease a credential for one job against `deployment`.
    async fn lease(&self, deployment: &DeploymentId) -> Result<CredentialRef, SecretError>;

    /// Return a lease. Releasing an unknown or already-released lease succeeds.
    async fn release(&self, credential: &CredentialRef) -> Result<(), SecretError>;
}
