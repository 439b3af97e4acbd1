use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::grpc::gs_service::GsService;
use crate::grpc::rm_service::RmService;
use crate::gs::GridScheduler;
use crate::proto::grid_scheduler_server::GridSchedulerServer;
use crate::proto::resource_manager_server::ResourceManagerServer;
use crate::rm::ResourceManager;

pub struct GsServer {
    addr: SocketAddr,
    node: Arc<GridScheduler>,
}

impl GsServer {
    pub fn new(addr: SocketAddr, node: Arc<GridScheduler>) -> Self {
        Self { addr, node }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");
        Server::builder()
            .add_service(GridSchedulerServer::new(GsService::new(self.node)))
            .serve_with_shutdown(self.addr, cancel.cancelled_owned())
            .await
    }
}

pub struct RmServer {
    addr: SocketAddr,
    node: Arc<ResourceManager>,
}

impl RmServer {
    pub fn new(addr: SocketAddr, node: Arc<ResourceManager>) -> Self {
        Self { addr, node }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");
        Server::builder()
            .add_service(ResourceManagerServer::new(RmService::new(self.node)))
            .serve_with_shutdown(self.addr, cancel.cancelled_owned())
            .await
    }
}
