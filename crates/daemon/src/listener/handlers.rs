// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request dispatch onto the runtime.

use outpost_core::{Clock, JobId};
use outpost_engine::EngineError;
use outpost_wire::{
    DeploymentDetail, JobDetail, JobSummary, Request, Response, PROTOCOL_VERSION,
};

use super::ListenCtx;

pub(super) async fn handle_request<C: Clock>(request: Request, ctx: &ListenCtx<C>) -> Response {
    let runtime = &ctx.runtime;
    let result: Result<Response, EngineError> = match request {
        Request::Hello { .. } => Ok(Response::Hello { version: PROTOCOL_VERSION.to_string() }),

        Request::HealthCheck => Ok(Response::Health { health: Box::new(runtime.health()) }),

        Request::SubmitJob { request } => {
            runtime.submit_job(request).map(|id| Response::JobSubmitted { id })
        }

        Request::GetJob { id } => {
            runtime.get_job(&id).map(|job| Response::Job { job: Box::new(JobDetail::from(&job)) })
        }

        Request::GetJobLogs { id } => runtime
            .job_logs(&id)
            .await
            .map(|bytes| Response::JobLogs { id: JobId::new(id), bytes }),

        Request::ListJobs { filter } => {
            let jobs = runtime.list_jobs(&filter).iter().map(JobSummary::from).collect();
            Ok(Response::Jobs { jobs })
        }

        Request::CancelJob { id } => runtime
            .cancel_job(&id)
            .await
            .map(|outcome| Response::Cancel { id: JobId::new(id), outcome }),

        Request::AcknowledgeJob { id } => runtime.acknowledge_job(&id).await.map(|_| Response::Ok),

        Request::GetDeploymentStatus { id } => runtime
            .deployment_status(&id)
            .map(|d| Response::Deployment { deployment: Box::new(DeploymentDetail::from(&d)) }),

        Request::ListDeployments => {
            let deployments =
                runtime.list_deployments().iter().map(DeploymentDetail::from).collect();
            Ok(Response::Deployments { deployments })
        }

        Request::RegisterDeployment { spec } => runtime
            .register_deployment(spec)
            .map(|d| Response::Deployment { deployment: Box::new(DeploymentDetail::from(&d)) }),

        Request::RemoveDeployment { id } => runtime.remove_deployment(&id).map(|_| Response::Ok),

        Request::Shutdown => {
            ctx.shutdown.cancel();
            Ok(Response::ShuttingDown)
        }
    };

    result.unwrap_or_else(|e| Response::error(e.kind(), e.to_string()))
}
