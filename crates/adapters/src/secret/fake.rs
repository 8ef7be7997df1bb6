// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{SecretError, SecretProvider};
use async_trait::async_trait;
use outpost_core::{CredentialRef, DeploymentId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Recorded secret provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretCall {
    Lease { deployment: DeploymentId },
    Release { credential: CredentialRef },
}

#[derive(Default)]
struct FakeSecretState {
    calls: Vec<SecretCall>,
    active: HashMap<CredentialRef, DeploymentId>,
    missing: HashSet<DeploymentId>,
    release_failures: u32,
    next: u64,
}

/// Fake secret provider for testing
#[derive(Clone, Default)]
pub struct FakeSecretProvider {
    inner: Arc<Mutex<FakeSecretState>>,
}

impl FakeSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SecretCall> {
        self.inner.lock().calls.clone()
    }

    /// Leases handed out and not yet released.
    pub fn active_leases(&self) -> usize {
        self.inner.lock().active.len()
    }

    /// Make leases for `deployment` fail with `NotFound`.
    pub fn remove_credentials(&self, deployment: &DeploymentId) {
        self.inner.lock().missing.insert(deployment.clone());
    }

    /// Make the next `count` releases fail.
    pub fn fail_releases(&self, count: u32) {
        self.inner.lock().release_failures = count;
    }
}

#[async_trait]
impl SecretProvider for FakeSecretProvider {
    async fn lease(&self, deployment: &DeploymentId) -> Result<CredentialRef, SecretError> {
        let mut state = self.inner.lock();
        state.calls.push(SecretCall::Lease { deployment: deployment.clone() });
        if state.missing.contains(deployment) {
            return Err(SecretError::NotFound(deployment.to_string()));
        }
        state.next += 1;
        let credential = CredentialRef(format!("lease-{}-{}", deployment, state.next));
        state.active.insert(credential.clone(), deployment.clone());
        Ok(credential)
    }

    async fn release(&self, credential: &CredentialRef) -> Result<(), SecretError> {
        let mut state = self.inner.lock();
        state.calls.push(SecretCall::Release { credential: credential.clone() });
        if state.release_failures > 0 {
            state.release_failures -= 1;
            return Err(SecretError::Unavailable("store offline".to_string()));
        }
        state.active.remove(credential);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn release_is_idempotent() {
        let secrets = FakeSecretProvider::new();
        let cred = secrets.lease(&DeploymentId::new("prod")).await.unwrap();
        assert_eq!(secrets.active_leases(), 1);
        secrets.release(&cred).await.unwrap();
        secrets.release(&cred).await.unwrap();
        assert_eq!(secrets.active_leases(), 0);
    }

    #[tokio::test]
    async fn missing_credentials_fail_lease() {
        let secrets = FakeSecretProvider::new();
        let dep = DeploymentId::new("prod");
        secrets.remove_credentials(&dep);
        assert!(matches!(secrets.lease(&dep).await, Err(SecretError::NotFound(_))));
    }
}
