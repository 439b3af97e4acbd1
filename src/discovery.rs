//! The discovery service and the client helpers nodes use to stay
//! registered with it.
//!
//! Discovery holds the only cluster-wide roster: nodes probe it once at
//! startup to learn their peers and then heartbeat so they stay listed.
//! Registration state is purely in-memory; a node that stops polling
//! ages out of probe responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::config::DiscoveryConfig;
use crate::error::{GridError, Result};
use crate::grpc::client;
use crate::proto::discovery_server::{Discovery as DiscoveryRpc, DiscoveryServer};
use crate::proto::{NodeKind, PollRequest, PollResponse, ProbeRequest, ProbeResponse};

/// Roster of live nodes with their last-heard-from time.
#[derive(Debug)]
pub struct Registry {
    inner: Mutex<HashMap<String, (NodeKind, Instant)>>,
    liveness: Duration,
}

impl Registry {
    pub fn new(liveness: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            liveness,
        }
    }

    pub fn register(&self, addr: String, kind: NodeKind) {
        self.inner.lock().unwrap().insert(addr, (kind, Instant::now()));
    }

    /// Current roster split by kind, excluding the caller and anything
    /// that stopped polling. Sorted so responses are stable.
    pub fn roster(&self, exclude: &str) -> (Vec<String>, Vec<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.retain(|_, (_, seen)| seen.elapsed() < self.liveness);

        let mut gs_addrs = Vec::new();
        let mut rm_addrs = Vec::new();
        for (addr, (kind, _)) in inner.iter() {
            if addr == exclude {
                continue;
            }
            match kind {
                NodeKind::GridScheduler => gs_addrs.push(addr.clone()),
                NodeKind::ResourceManager => rm_addrs.push(addr.clone()),
                NodeKind::Unspecified => {}
            }
        }
        gs_addrs.sort();
        rm_addrs.sort();
        (gs_addrs, rm_addrs)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

pub struct DiscoveryService {
    registry: Arc<Registry>,
}

impl DiscoveryService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

#[tonic::async_trait]
impl DiscoveryRpc for DiscoveryService {
    async fn probe(
        &self,
        request: Request<ProbeRequest>,
    ) -> std::result::Result<Response<ProbeResponse>, Status> {
        let req = request.into_inner();
        let kind = NodeKind::try_from(req.kind).unwrap_or(NodeKind::Unspecified);
        if kind == NodeKind::Unspecified {
            return Err(Status::invalid_argument("Node kind must be specified"));
        }

        tracing::info!(addr = %req.addr, kind = ?kind, "Node registered");
        let (gs_addrs, rm_addrs) = self.registry.roster(&req.addr);
        self.registry.register(req.addr, kind);

        Ok(Response::new(ProbeResponse { gs_addrs, rm_addrs }))
    }

    async fn poll(
        &self,
        request: Request<PollRequest>,
    ) -> std::result::Result<Response<PollResponse>, Status> {
        let req = request.into_inner();
        let kind = NodeKind::try_from(req.kind).unwrap_or(NodeKind::Unspecified);
        if kind == NodeKind::Unspecified {
            return Err(Status::invalid_argument("Node kind must be specified"));
        }
        self.registry.register(req.addr, kind);
        Ok(Response::new(PollResponse {}))
    }
}

/// Run the discovery service until cancelled.
pub async fn serve(config: DiscoveryConfig, cancel: CancellationToken) -> Result<()> {
    serve_with_registry(
        config.listen_addr,
        Arc::new(Registry::new(Duration::from_millis(config.liveness_window_ms))),
        cancel,
    )
    .await
}

pub async fn serve_with_registry(
    addr: SocketAddr,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!(addr = %addr, "Starting discovery service");
    Server::builder()
        .add_service(DiscoveryServer::new(DiscoveryService::new(registry)))
        .serve_with_shutdown(addr, cancel.cancelled_owned())
        .await
        .map_err(GridError::from)
}

/// Periodic heartbeat every node runs so discovery keeps listing it.
/// Failures are logged and retried on the next tick.
pub async fn poll_loop(
    discovery_addr: String,
    self_addr: String,
    kind: NodeKind,
    interval: Duration,
    rpc_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(e) =
            client::discovery_poll(&discovery_addr, &self_addr, kind, rpc_timeout).await
        {
            tracing::warn!(discovery = %discovery_addr, error = %e, "Discovery heartbeat failed");
        }
    }
}
