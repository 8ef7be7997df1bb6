// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use outpost_core::{DeploymentSpec, JobFilter, JobRequest};
use serde::{Deserialize, Serialize};

/// Request from an operator client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    /// Version handshake; required first message on TCP connections
    Hello {
        version: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Liveness plus metrics snapshot
    HealthCheck,

    /// Submit a job through the scheduler
    SubmitJob { request: JobRequest },

    GetJob { id: String },

    /// Output captured by the backend so far
    GetJobLogs { id: String },

    ListJobs {
        #[serde(default)]
        filter: JobFilter,
    },

    CancelJob { id: String },

    /// Skip the reaper grace period and clean up a terminal job now
    AcknowledgeJob { id: String },

    GetDeploymentStatus { id: String },

    ListDeployments,

    RegisterDeployment { spec: DeploymentSpec },

    RemoveDeployment { id: String },

    /// Request daemon shutdown
    Shutdown,
}

impl Request {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "hello",
            Request::HealthCheck => "health_check",
            Request::SubmitJob { .. } => "submit_job",
            Request::GetJob { .. } => "get_job",
            Request::GetJobLogs { .. } => "get_job_logs",
            Request::ListJobs { .. } => "list_jobs",
            Request::CancelJob { .. } => "cancel_job",
            Request::AcknowledgeJob { .. } => "acknowledge_job",
            Request::GetDeploymentStatus { .. } => "get_deployment_status",
            Request::ListDeployments => "list_deployments",
            Request::RegisterDeployment { .. } => "register_deployment",
            Request::RemoveDeployment { .. } => "remove_deployment",
            Request::Shutdown => "shutdown",
        }
    }
}
