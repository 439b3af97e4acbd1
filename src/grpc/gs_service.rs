use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::error::GridError;
use crate::gs::GridScheduler;
use crate::jobs::job::batch_from_proto;
use crate::proto::grid_scheduler_server::GridScheduler as GridSchedulerRpc;
use crate::proto::{Ack, CompletedJobs, CoordinationRequest, CoordinationResponse, JobBatch};

/// gRPC surface of a grid scheduler node. Thin: every method delegates
/// to the node, which owns the protocol logic.
pub struct GsService {
    node: Arc<GridScheduler>,
}

impl GsService {
    pub fn new(node: Arc<GridScheduler>) -> Self {
        Self { node }
    }
}

fn to_status(e: GridError) -> Status {
    match e {
        GridError::QueueFull => Status::resource_exhausted(e.to_string()),
        other => Status::internal(other.to_string()),
    }
}

#[tonic::async_trait]
impl GridSchedulerRpc for GsService {
    async fn coordinate(
        &self,
        request: Request<CoordinationRequest>,
    ) -> Result<Response<CoordinationResponse>, Status> {
        let req = request.into_inner();
        tracing::trace!(
            from = %req.addr,
            msg_type = req.msg_type,
            clock = req.clock,
            "Received coordination message"
        );
        let value = self
            .node
            .handle_coordination(req)
            .await
            .map_err(to_status)?;
        Ok(Response::new(CoordinationResponse { value }))
    }

    async fn recv_jobs(&self, request: Request<JobBatch>) -> Result<Response<Ack>, Status> {
        let jobs = batch_from_proto(&request.into_inner().jobs);
        tracing::debug!(count = jobs.len(), "Received replicated append");
        self.node.handle_recv_jobs(jobs).await;
        Ok(Response::new(Ack { value: 1 }))
    }

    async fn replace_jobs(&self, request: Request<JobBatch>) -> Result<Response<Ack>, Status> {
        let jobs = batch_from_proto(&request.into_inner().jobs);
        tracing::debug!(count = jobs.len(), "Received replicated list");
        self.node.handle_replace_jobs(jobs).await;
        Ok(Response::new(Ack { value: 1 }))
    }

    async fn add_jobs(&self, request: Request<JobBatch>) -> Result<Response<Ack>, Status> {
        let jobs = batch_from_proto(&request.into_inner().jobs);
        if jobs.is_empty() {
            return Err(Status::invalid_argument("Job batch cannot be empty"));
        }
        tracing::info!(count = jobs.len(), "Jobs submitted");
        self.node.handle_add_jobs(jobs).map_err(to_status)?;
        Ok(Response::new(Ack { value: 1 }))
    }

    async fn sync_completed_jobs(
        &self,
        request: Request<CompletedJobs>,
    ) -> Result<Response<Ack>, Status> {
        let job_ids = request.into_inner().job_ids;
        tracing::debug!(count = job_ids.len(), "Received completion report");
        self.node
            .handle_sync_completed_jobs(job_ids)
            .map_err(to_status)?;
        Ok(Response::new(Ack { value: 1 }))
    }
}
