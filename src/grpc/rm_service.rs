use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::jobs::job::batch_from_proto;
use crate::proto::resource_manager_server::ResourceManager as ResourceManagerRpc;
use crate::proto::{Ack, CoordinationRequest, CoordinationResponse, JobBatch, MsgType};
use crate::rm::ResourceManager;

/// gRPC surface of a resource manager node.
pub struct RmService {
    node: Arc<ResourceManager>,
}

impl RmService {
    pub fn new(node: Arc<ResourceManager>) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl ResourceManagerRpc for RmService {
    async fn coordinate(
        &self,
        request: Request<CoordinationRequest>,
    ) -> Result<Response<CoordinationResponse>, Status> {
        let req = request.into_inner();
        let value = match MsgType::try_from(req.msg_type) {
            Ok(MsgType::RmUp) => {
                // A scheduler announcing itself; remember it for
                // completion reports.
                self.node.register_scheduler(req.addr, req.node_id);
                self.node.node_id() as i64
            }
            Ok(MsgType::GetCapacity) => self.node.capacity() as i64,
            _ => {
                tracing::error!(msg_type = req.msg_type, "Unknown coordination message");
                return Err(Status::internal(format!(
                    "unknown coordination message type {}",
                    req.msg_type
                )));
            }
        };
        Ok(Response::new(CoordinationResponse { value }))
    }

    async fn add_job(&self, request: Request<JobBatch>) -> Result<Response<Ack>, Status> {
        let jobs = batch_from_proto(&request.into_inner().jobs);
        tracing::info!(count = jobs.len(), "Jobs received for execution");
        for job in jobs {
            self.node.submit(job);
        }
        Ok(Response::new(Ack { value: 0 }))
    }
}
