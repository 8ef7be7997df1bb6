// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.

use outpost_core::{DeploymentId, JobId, JobState, TransitionError, ValidationError};
use outpost_wire::ErrorKind;
use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] ValidationError),

    #[error("job {0} already exists")]
    DuplicateId(JobId),

    #[error("deployment {0} already registered")]
    DuplicateDeployment(DeploymentId),

    #[error("job {id} is {actual}, expected {expected}")]
    StaleState { id: JobId, expected: JobState, actual: JobState },

    #[error("job {id} is already terminal ({state})")]
    AlreadyTerminal { id: JobId, state: JobState },

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition { id: JobId, from: JobState, to: JobState },

    #[error("job {id} is not terminal ({state})")]
    NotTerminal { id: JobId, state: JobState },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("queue full ({ceiling} jobs waiting)")]
    QueueFull { ceiling: usize },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("engine is shutting down")]
    ShuttingDown,
}

impl EngineError {
    /// Stable wire classification for the admin surface.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidSpec(_) => ErrorKind::InvalidSpec,
            EngineError::DuplicateId(_) | EngineError::DuplicateDeployment(_) => {
                ErrorKind::DuplicateId
            }
            EngineError::StaleState { .. } => ErrorKind::StaleState,
            EngineError::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            EngineError::InvalidTransition { .. } | EngineError::NotTerminal { .. } => {
                ErrorKind::InvalidTransition
            }
            EngineError::JobNotFound(_) | EngineError::DeploymentNotFound(_) => ErrorKind::NotFound,
            EngineError::QueueFull { .. } => ErrorKind::QueueFull,
            EngineError::Backend(_) | EngineError::Credential(_) => ErrorKind::Backend,
            EngineError::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::AlreadyTerminal { id, state } => {
                EngineError::AlreadyTerminal { id, state }
            }
            TransitionError::Invalid { id, from, to } => {
                EngineError::InvalidTransition { id, from, to }
            }
        }
    }
}
