use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clock::LamportClock;
use crate::config::GsConfig;
use crate::discovery;
use crate::error::{GridError, Result};
use crate::grpc::client;
use crate::grpc::server::GsServer;
use crate::gs::election::Election;
use crate::gs::mutex::{Disposition, MutexEngine, MutexShared};
use crate::gs::tasks::{CsRunner, CsTask, TaskQueue};
use crate::jobs::job::{batch_to_proto, Job};
use crate::jobs::JobsList;
use crate::peers::PeerSet;
use crate::proto::{CoordinationRequest, MsgType, NodeKind, ProbeResponse};

/// A grid scheduler node.
///
/// Accepts jobs from clients, keeps a replicated jobs list in sync with
/// its peers, takes part in leader election, and - while leader -
/// dispatches waiting jobs to resource managers by reported capacity.
pub struct GridScheduler {
    pub(crate) config: GsConfig,
    pub(crate) clock: Arc<LamportClock>,
    pub(crate) gs_peers: Arc<PeerSet>,
    pub(crate) rm_peers: Arc<PeerSet>,
    pub(crate) leader: Arc<RwLock<String>>,
    pub(crate) jobs: Arc<RwLock<JobsList>>,
    pub(crate) election: Arc<Election>,
    pub(crate) mutex: Arc<MutexShared>,
    tasks: TaskQueue,
}

impl GridScheduler {
    /// Build a node plus the critical-section runner that `run` (or a
    /// test harness) must drive.
    pub fn new(config: GsConfig) -> (Arc<Self>, CsRunner) {
        let clock = Arc::new(LamportClock::new());
        let gs_peers = Arc::new(PeerSet::new());
        let rm_peers = Arc::new(PeerSet::new());
        let leader = Arc::new(RwLock::new(String::new()));

        let election = Arc::new(Election::new(
            clock.clone(),
            gs_peers.clone(),
            leader.clone(),
            config.node_id,
            config.advertised_addr(),
            Duration::from_millis(config.election_settle_ms),
            Duration::from_millis(config.rpc_timeout_ms),
        ));

        let (engine, mutex) = MutexEngine::new(
            clock.clone(),
            gs_peers.clone(),
            config.node_id,
            config.advertised_addr(),
            Duration::from_millis(config.mutex_obtain_timeout_ms),
            Duration::from_millis(config.rpc_timeout_ms),
        );

        let (tasks, runner) = CsRunner::new(
            engine,
            Duration::from_millis(config.task_loop_interval_ms),
            Duration::from_micros(config.cs_slice_us),
        );

        let node = Arc::new(Self {
            config,
            clock,
            gs_peers,
            rm_peers,
            leader,
            jobs: Arc::new(RwLock::new(JobsList::new())),
            election,
            mutex,
            tasks,
        });
        (node, runner)
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

    pub async fn is_leader(&self) -> bool {
        *self.leader.read().await == self.config.advertised_addr()
    }

    pub async fn current_leader(&self) -> String {
        self.leader.read().await.clone()
    }

    /// Point-in-time copy of the replicated jobs list.
    pub async fn jobs_snapshot(&self) -> Vec<Job> {
        self.jobs.read().await.jobs().to_vec()
    }

    /// Run the node: bootstrap through discovery, announce to peers,
    /// then drive all periodic loops and the gRPC server until
    /// cancelled. A failure of the critical-section runner is fatal and
    /// surfaces here as an error.
    pub async fn run(
        self: Arc<Self>,
        runner: CsRunner,
        cancel: CancellationToken,
    ) -> Result<()> {
        let advertised = self.config.advertised_addr();
        let roster = client::discovery_probe(
            &self.config.discovery_addr,
            &advertised,
            NodeKind::GridScheduler,
            self.rpc_timeout(),
        )
        .await?;
        self.announce(&roster).await;

        tokio::spawn(discovery::poll_loop(
            self.config.discovery_addr.clone(),
            advertised,
            NodeKind::GridScheduler,
            Duration::from_millis(self.config.heartbeat_interval_ms),
            self.rpc_timeout(),
            cancel.clone(),
        ));
        tokio::spawn(self.clone().poll_leader_loop(cancel.clone()));
        tokio::spawn(self.clone().scheduler_loop(cancel.clone()));
        let runner_handle = tokio::spawn(runner.run(cancel.clone()));

        let server = GsServer::new(self.config.listen_addr, self.clone());
        tracing::info!(
            node_id = self.config.node_id,
            addr = %self.config.listen_addr,
            "Starting grid scheduler"
        );

        let server_fut = server.run(cancel.clone());
        tokio::pin!(server_fut);
        tokio::select! {
            res = &mut server_fut => res.map_err(GridError::from),
            res = runner_handle => match res {
                Ok(()) => Ok(()),
                Err(e) => Err(GridError::Internal(format!(
                    "critical-section runner failed: {e}"
                ))),
            },
        }
    }

    /// Introduce this node to everyone the discovery roster names. The
    /// reply to a hello carries the callee's id, which we cache next to
    /// the address. Re-running the flow is harmless.
    pub async fn announce(&self, roster: &ProbeResponse) {
        let advertised = self.config.advertised_addr();
        for addr in &roster.gs_addrs {
            if *addr == advertised {
                continue;
            }
            let req = self.coordination(MsgType::GsUp);
            match client::coordinate_gs(addr, req, self.rpc_timeout()).await {
                Ok(id) if id >= 0 => self.gs_peers.insert(addr.clone(), id as u64),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(peer = %addr, error = %e, "Scheduler peer not reachable");
                }
            }
        }
        for addr in &roster.rm_addrs {
            let req = self.coordination(MsgType::RmUp);
            match client::coordinate_rm(addr, req, self.rpc_timeout()).await {
                Ok(id) if id >= 0 => self.rm_peers.insert(addr.clone(), id as u64),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(peer = %addr, error = %e, "Resource manager not reachable");
                }
            }
        }
    }

    fn coordination(&self, msg_type: MsgType) -> CoordinationRequest {
        CoordinationRequest {
            node_id: self.config.node_id,
            addr: self.config.advertised_addr(),
            msg_type: msg_type as i32,
            clock: self.clock.tick(),
        }
    }

    /// Inbound coordination dispatch. The Lamport merge happens before
    /// anything else so every decision below observes the sender's
    /// stamp.
    pub async fn handle_coordination(self: &Arc<Self>, req: CoordinationRequest) -> Result<i64> {
        self.clock.merge(req.clock);

        match MsgType::try_from(req.msg_type) {
            Ok(MsgType::Election) => {
                if !self.election.in_progress() {
                    let election = self.election.clone();
                    tokio::spawn(async move {
                        election.elect().await;
                    });
                }
                Ok(1)
            }
            Ok(MsgType::Coordinate) => {
                *self.leader.write().await = req.addr.clone();
                tracing::info!(leader = %req.addr, "Leader set");
                Ok(1)
            }
            Ok(MsgType::MutexRequest) => {
                match self
                    .mutex
                    .disposition(self.config.node_id, req.node_id, req.clock)
                {
                    Disposition::Defer => self.mutex.defer(req.addr),
                    Disposition::Grant => self.grant_mutex(req.addr),
                }
                Ok(1)
            }
            Ok(MsgType::MutexResponse) => {
                self.mutex.on_response(req.clock);
                Ok(1)
            }
            Ok(MsgType::GsUp) => {
                self.gs_peers.insert(req.addr, req.node_id);
                Ok(self.config.node_id as i64)
            }
            Ok(MsgType::RmUp) => {
                self.rm_peers.insert(req.addr, req.node_id);
                Ok(self.config.node_id as i64)
            }
            _ => {
                tracing::error!(msg_type = req.msg_type, "Unknown coordination message");
                Err(GridError::Internal(format!(
                    "unknown coordination message type {}",
                    req.msg_type
                )))
            }
        }
    }

    /// Permission granted right away: answered with a separate outbound
    /// call rather than the RPC reply, so grants and deferrals travel
    /// the same path.
    fn grant_mutex(self: &Arc<Self>, to: String) {
        let node = self.clone();
        tokio::spawn(async move {
            let req = node.coordination(MsgType::MutexResponse);
            if let Err(e) = client::coordinate_gs(&to, req, node.rpc_timeout()).await {
                tracing::debug!(peer = %to, error = %e, "Mutex grant not delivered");
            }
        });
    }

    /// Client entry point: serialize the append through the task queue
    /// so it happens under the cluster-wide critical section and is
    /// replicated to every peer.
    pub fn handle_add_jobs(self: &Arc<Self>, jobs: Vec<Job>) -> Result<()> {
        let node = self.clone();
        let task: CsTask = Box::pin(async move {
            node.jobs.write().await.append(jobs.clone());
            tracing::info!(count = jobs.len(), "Jobs appended");

            let batch = batch_to_proto(&jobs);
            let timeout = node.rpc_timeout();
            let pushes = node.gs_peers.snapshot().into_iter().map(|(addr, _)| {
                let batch = batch.clone();
                async move {
                    if let Err(e) = client::recv_jobs(&addr, batch, timeout).await {
                        tracing::warn!(peer = %addr, error = %e, "Append not replicated");
                    }
                }
            });
            join_all(pushes).await;
            Ok(())
        });
        self.tasks.push(task)
    }

    /// Replicated append from a peer that holds the critical section.
    pub async fn handle_recv_jobs(&self, jobs: Vec<Job>) {
        self.jobs.write().await.append(jobs);
    }

    /// Replicated full replacement from a peer that holds the critical
    /// section.
    pub async fn handle_replace_jobs(&self, jobs: Vec<Job>) {
        self.jobs.write().await.replace(jobs);
    }

    /// Completion report from a resource manager: under CS, move the
    /// named jobs to done and push the updated list to every peer.
    pub fn handle_sync_completed_jobs(self: &Arc<Self>, job_ids: Vec<i64>) -> Result<()> {
        let node = self.clone();
        let task: CsTask = Box::pin(async move {
            let done = node.jobs.write().await.mark_done(&job_ids);
            if done == 0 {
                return Ok(());
            }
            tracing::info!(done, "Jobs completed");
            node.replicate_full_list().await;
            Ok(())
        });
        self.tasks.push(task)
    }

    async fn replicate_full_list(&self) {
        let snapshot = {
            let list = self.jobs.read().await;
            batch_to_proto(list.jobs())
        };
        let timeout = self.rpc_timeout();
        let pushes = self.gs_peers.snapshot().into_iter().map(|(addr, _)| {
            let snapshot = snapshot.clone();
            async move {
                if let Err(e) = client::replace_jobs(&addr, snapshot, timeout).await {
                    tracing::warn!(peer = %addr, error = %e, "Jobs list not replicated");
                }
            }
        });
        join_all(pushes).await;
    }

    /// Watch the leader and call an election when it goes dark. Also
    /// covers first start, where no leader is known yet.
    async fn poll_leader_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_millis(
            self.config.leader_poll_interval_ms,
        ));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if self.election.in_progress() {
                continue;
            }
            let leader = self.leader.read().await.clone();
            if leader == self.config.advertised_addr() {
                continue;
            }
            let reachable =
                !leader.is_empty() && client::probe_tcp(&leader, self.rpc_timeout()).await;
            if !reachable {
                tracing::info!(leader = %leader, "Leader unreachable, initiating election");
                self.election.elect().await;
            }
        }
    }

    /// Leader-only dispatch tick: probe every resource manager for free
    /// capacity, then enqueue one CS task that hands out waiting jobs
    /// and replicates the result.
    async fn scheduler_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.schedule_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if !self.is_leader().await {
                continue;
            }
            if !self.jobs.read().await.has_waiting() {
                continue;
            }

            let mut capacities = Vec::new();
            for (addr, _) in self.rm_peers.snapshot() {
                let req = self.coordination(MsgType::GetCapacity);
                match client::coordinate_rm(&addr, req, self.rpc_timeout()).await {
                    Ok(cap) if cap > 0 => capacities.push((addr, cap as usize)),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(peer = %addr, error = %e, "Capacity probe failed");
                    }
                }
            }
            if capacities.is_empty() {
                continue;
            }

            let node = self.clone();
            let task: CsTask = Box::pin(async move {
                node.dispatch(capacities).await;
                Ok(())
            });
            if let Err(e) = self.tasks.push(task) {
                tracing::warn!(error = %e, "Dispatch task not enqueued");
            }
        }
    }

    /// Runs under CS: hand each resource manager at most its reported
    /// capacity in waiting jobs, in list order, then push the updated
    /// list to every peer.
    async fn dispatch(&self, capacities: Vec<(String, usize)>) {
        let mut dispatched_any = false;
        for (rm_addr, capacity) in capacities {
            let batch = {
                let list = self.jobs.read().await;
                list.waiting(capacity)
            };
            if batch.is_empty() {
                break;
            }
            let ids: Vec<i64> = batch.iter().map(|j| j.id).collect();
            match client::add_job_rm(&rm_addr, batch_to_proto(&batch), self.rpc_timeout()).await {
                Ok(()) => {
                    self.jobs.write().await.mark_submitted(&ids);
                    dispatched_any = true;
                    tracing::info!(rm = %rm_addr, count = ids.len(), "Jobs dispatched");
                }
                Err(e) => {
                    tracing::warn!(rm = %rm_addr, error = %e, "Dispatch failed");
                }
            }
        }
        if dispatched_any {
            self.replicate_full_list().await;
        }
    }
}
