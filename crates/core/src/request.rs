// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unvalidated job requests and their validation.
//!
//! Requests arrive from the control plane and the admin socket as loosely
//! typed data. [`JobRequest::validate`] is the only way to obtain a
//! [`JobSpec`], so nothing reaches the registry without passing it.

use crate::deployment::DeploymentId;
use crate::id::is_valid_id;
use crate::job::{JobId, JobKind, JobSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Size limits enforced on incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecLimits {
    pub max_payload_bytes: usize,
    pub max_command_args: usize,
    pub max_env_vars: usize,
}

impl Default for SpecLimits {
    fn default() -> Self {
        Self { max_payload_bytes: 1024 * 1024, max_command_args: 256, max_env_vars: 128 }
    }
}

/// Reasons a request is rejected before touching any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown job kind '{0}'")]
    UnknownKind(String),
    #[error("command must not be empty")]
    EmptyCommand,
    #[error("command has {count} arguments (limit {limit})")]
    TooManyArgs { count: usize, limit: usize },
    #[error("environment has {count} variables (limit {limit})")]
    TooManyEnvVars { count: usize, limit: usize },
    #[error("invalid environment variable name '{0}'")]
    InvalidEnvName(String),
    #[error("payload is {size} bytes (limit {limit})")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("invalid job id '{0}'")]
    InvalidId(String),
    #[error("invalid deployment id '{0}'")]
    InvalidDeploymentId(String),
    #[error("plan-only jobs require a deployment")]
    MissingDeployment,
    #[error("interval must be positive")]
    ZeroInterval,
}

/// A job request as received on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Caller-supplied id; generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl JobRequest {
    pub fn new(kind: impl Into<String>, command: Vec<String>) -> Self {
        Self { kind: kind.into(), command, ..Self::default() }
    }

    crate::setters! {
        set {
            env: BTreeMap<String, String>,
            payload: Vec<u8>,
        }
        option {
            id: String,
            deployment: String,
        }
    }

    /// Check the request against `limits`, producing the id (if supplied)
    /// and the typed spec.
    pub fn validate(self, limits: &SpecLimits) -> Result<(Option<JobId>, JobSpec), ValidationError> {
        let kind: JobKind =
            self.kind.parse().map_err(|_| ValidationError::UnknownKind(self.kind.clone()))?;

        let id = match self.id {
            Some(id) if !is_valid_id(&id) => return Err(ValidationError::InvalidId(id)),
            Some(id) => Some(JobId::new(id)),
            None => None,
        };

        let deployment = match self.deployment {
            Some(dep) if !is_valid_id(&dep) => {
                return Err(ValidationError::InvalidDeploymentId(dep))
            }
            Some(dep) => Some(DeploymentId::new(dep)),
            None => None,
        };
        if kind == JobKind::PlanOnly && deployment.is_none() {
            return Err(ValidationError::MissingDeployment);
        }

        validate_command(&self.command, &self.env, &self.payload, limits)?;

        Ok((
            id,
            JobSpec { kind, deployment, command: self.command, env: self.env, payload: self.payload },
        ))
    }
}

/// Shared checks for anything that ends up as a backend command.
pub(crate) fn validate_command(
    command: &[String],
    env: &BTreeMap<String, String>,
    payload: &[u8],
    limits: &SpecLimits,
) -> Result<(), ValidationError> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    if command.len() > limits.max_command_args {
        return Err(ValidationError::TooManyArgs {
            count: command.len(),
            limit: limits.max_command_args,
        });
    }
    if env.len() > limits.max_env_vars {
        return Err(ValidationError::TooManyEnvVars {
            count: env.len(),
            limit: limits.max_env_vars,
        });
    }
    if let Some(bad) = env.keys().find(|k| !is_env_name(k)) {
        return Err(ValidationError::InvalidEnvName(bad.clone()));
    }
    if payload.len() > limits.max_payload_bytes {
        return Err(ValidationError::PayloadTooLarge {
            size: payload.len(),
            limit: limits.max_payload_bytes,
        });
    }
    Ok(())
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
