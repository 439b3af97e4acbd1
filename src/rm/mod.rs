pub mod reporter;
pub mod workers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RmConfig;
use crate::discovery;
use crate::error::{GridError, Result};
use crate::grpc::client;
use crate::grpc::server::RmServer;
use crate::jobs::Job;
use crate::peers::PeerSet;
use crate::proto::{CoordinationRequest, MsgType, NodeKind};
use crate::rm::workers::WorkerPool;

/// A resource manager node: a fixed pool of workers plus the plumbing
/// to announce itself to schedulers, answer capacity probes, and report
/// completions.
pub struct ResourceManager {
    config: RmConfig,
    gs_peers: Arc<PeerSet>,
    pool: WorkerPool,
}

impl ResourceManager {
    /// Build a node plus the completion channel the reporter loop in
    /// `run` drains.
    pub fn new(config: RmConfig) -> (Arc<Self>, mpsc::UnboundedReceiver<i64>) {
        let (pool, completed_rx) = WorkerPool::new(config.workers);
        let node = Arc::new(Self {
            config,
            gs_peers: Arc::new(PeerSet::new()),
            pool,
        });
        (node, completed_rx)
    }

    pub fn node_id(&self) -> u64 {
        self.config.node_id
    }

    pub fn advertised_addr(&self) -> String {
        self.config.advertised_addr()
    }

    fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.config.rpc_timeout_ms)
    }

    pub fn register_scheduler(&self, addr: String, id: u64) {
        self.gs_peers.insert(addr, id);
    }

    pub fn submit(&self, job: Job) {
        self.pool.submit(job);
    }

    /// Free worker count.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    pub async fn run(
        self: Arc<Self>,
        completed_rx: mpsc::UnboundedReceiver<i64>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let advertised = self.config.advertised_addr();
        let roster = client::discovery_probe(
            &self.config.discovery_addr,
            &advertised,
            NodeKind::ResourceManager,
            self.rpc_timeout(),
        )
        .await?;
        self.announce(&roster.gs_addrs).await;

        tokio::spawn(discovery::poll_loop(
            self.config.discovery_addr.clone(),
            advertised,
            NodeKind::ResourceManager,
            Duration::from_millis(self.config.heartbeat_interval_ms),
            self.rpc_timeout(),
            cancel.clone(),
        ));
        tokio::spawn(reporter::run(
            completed_rx,
            self.gs_peers.clone(),
            Duration::from_millis(self.config.report_interval_ms),
            self.rpc_timeout(),
            cancel.clone(),
        ));

        tracing::info!(
            node_id = self.config.node_id,
            addr = %self.config.listen_addr,
            workers = self.pool.workers(),
            "Starting resource manager"
        );
        let server = RmServer::new(self.config.listen_addr, self.clone());
        server.run(cancel).await.map_err(GridError::from)
    }

    /// Tell every scheduler in the roster about this node; replies
    /// carry the scheduler ids we cache for completion reporting.
    pub async fn announce(&self, gs_addrs: &[String]) {
        for addr in gs_addrs {
            let req = CoordinationRequest {
                node_id: self.config.node_id,
                addr: self.config.advertised_addr(),
                msg_type: MsgType::RmUp as i32,
                clock: 0,
            };
            match client::coordinate_gs(addr, req, self.rpc_timeout()).await {
                Ok(id) if id >= 0 => self.gs_peers.insert(addr.clone(), id as u64),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(scheduler = %addr, error = %e, "Scheduler not reachable");
                }
            }
        }
    }
}
