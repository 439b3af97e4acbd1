//! Outbound RPC helpers.
//!
//! Peers are addressed by endpoint string only; every call dials a fresh
//! connection, performs one request, and drops the channel. Each helper
//! bounds dial + call with a single timeout so a dead peer costs at most
//! that long.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{GridError, Result};
use crate::proto::discovery_client::DiscoveryClient;
use crate::proto::grid_scheduler_client::GridSchedulerClient;
use crate::proto::resource_manager_client::ResourceManagerClient;
use crate::proto::{
    CompletedJobs, CoordinationRequest, Job, JobBatch, NodeKind, PollRequest, ProbeRequest,
    ProbeResponse,
};

fn endpoint(addr: &str) -> String {
    format!("http://{addr}")
}

/// Send a coordination message to a grid scheduler. Returns the reply
/// value (the callee's id for hello messages).
pub async fn coordinate_gs(
    addr: &str,
    req: CoordinationRequest,
    deadline: Duration,
) -> Result<i64> {
    let call = async {
        let mut client = GridSchedulerClient::connect(endpoint(addr)).await?;
        let resp = client.coordinate(req).await?;
        Ok::<_, GridError>(resp.into_inner().value)
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Send a coordination message to a resource manager.
pub async fn coordinate_rm(
    addr: &str,
    req: CoordinationRequest,
    deadline: Duration,
) -> Result<i64> {
    let call = async {
        let mut client = ResourceManagerClient::connect(endpoint(addr)).await?;
        let resp = client.coordinate(req).await?;
        Ok::<_, GridError>(resp.into_inner().value)
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Append a batch to a peer scheduler's jobs list. Caller must hold the
/// critical section.
pub async fn recv_jobs(addr: &str, jobs: Vec<Job>, deadline: Duration) -> Result<()> {
    let call = async {
        let mut client = GridSchedulerClient::connect(endpoint(addr)).await?;
        client.recv_jobs(JobBatch { jobs }).await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Replace a peer scheduler's jobs list wholesale. Caller must hold the
/// critical section.
pub async fn replace_jobs(addr: &str, jobs: Vec<Job>, deadline: Duration) -> Result<()> {
    let call = async {
        let mut client = GridSchedulerClient::connect(endpoint(addr)).await?;
        client.replace_jobs(JobBatch { jobs }).await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Client entry point: hand a batch of new jobs to any scheduler.
pub async fn add_jobs(addr: &str, jobs: Vec<Job>, deadline: Duration) -> Result<()> {
    let call = async {
        let mut client = GridSchedulerClient::connect(endpoint(addr)).await?;
        client.add_jobs(JobBatch { jobs }).await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Report completed job ids from a resource manager to a scheduler.
pub async fn sync_completed_jobs(
    addr: &str,
    job_ids: Vec<i64>,
    deadline: Duration,
) -> Result<()> {
    let call = async {
        let mut client = GridSchedulerClient::connect(endpoint(addr)).await?;
        client.sync_completed_jobs(CompletedJobs { job_ids }).await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Dispatch a batch of jobs to a resource manager for execution.
pub async fn add_job_rm(addr: &str, jobs: Vec<Job>, deadline: Duration) -> Result<()> {
    let call = async {
        let mut client = ResourceManagerClient::connect(endpoint(addr)).await?;
        client.add_job(JobBatch { jobs }).await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}

/// Cheap liveness probe: a raw TCP connect, immediately dropped.
pub async fn probe_tcp(addr: &str, deadline: Duration) -> bool {
    matches!(timeout(deadline, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Register with the discovery service and fetch the current roster.
pub async fn discovery_probe(
    discovery_addr: &str,
    self_addr: &str,
    kind: NodeKind,
    deadline: Duration,
) -> Result<ProbeResponse> {
    let call = async {
        let mut client = DiscoveryClient::connect(endpoint(discovery_addr)).await?;
        let resp = client
            .probe(ProbeRequest {
                addr: self_addr.to_string(),
                kind: kind as i32,
            })
            .await?;
        Ok::<_, GridError>(resp.into_inner())
    };
    timeout(deadline, call)
        .await
        .map_err(|_| GridError::Timeout)?
        .map_err(|e| GridError::Discovery(e.to_string()))
}

/// One liveness heartbeat to the discovery service.
pub async fn discovery_poll(
    discovery_addr: &str,
    self_addr: &str,
    kind: NodeKind,
    deadline: Duration,
) -> Result<()> {
    let call = async {
        let mut client = DiscoveryClient::connect(endpoint(discovery_addr)).await?;
        client
            .poll(PollRequest {
                addr: self_addr.to_string(),
                kind: kind as i32,
            })
            .await?;
        Ok::<_, GridError>(())
    };
    timeout(deadline, call).await.map_err(|_| GridError::Timeout)?
}
