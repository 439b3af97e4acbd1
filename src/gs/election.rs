//! Bully leader election over the grid scheduler peers. A node that
//! suspects the leader probes every peer with a higher id; if none of
//! them answers, it assumes leadership and announces itself to the
//! whole cluster. Higher-id nodes pre-empt by running their own round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;

use crate::clock::LamportClock;
use crate::grpc::client;
use crate::peers::PeerSet;
use crate::proto::{CoordinationRequest, MsgType};

pub struct Election {
    in_election: AtomicBool,
    clock: Arc<LamportClock>,
    peers: Arc<PeerSet>,
    leader: Arc<RwLock<String>>,
    self_id: u64,
    self_addr: String,
    settle: Duration,
    rpc_timeout: Duration,
}

impl Election {
    pub fn new(
        clock: Arc<LamportClock>,
        peers: Arc<PeerSet>,
        leader: Arc<RwLock<String>>,
        self_id: u64,
        self_addr: String,
        settle: Duration,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            in_election: AtomicBool::new(false),
            clock,
            peers,
            leader,
            self_id,
            self_addr,
            settle,
            rpc_timeout,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.in_election.load(Ordering::SeqCst)
    }

    /// Run one election round. Re-entrant calls while a round is in
    /// flight return immediately; the settle sleep at the tail absorbs
    /// bursts of concurrent triggers.
    pub async fn elect(&self) {
        if self.in_election.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!(node_id = self.self_id, "Starting election");
        self.clock.tick();

        let mut answers = 0usize;
        for (addr, peer_id) in self.peers.snapshot() {
            if peer_id <= self.self_id {
                continue;
            }
            let req = CoordinationRequest {
                node_id: self.self_id,
                addr: self.self_addr.clone(),
                msg_type: MsgType::Election as i32,
                clock: self.clock.tick(),
            };
            match client::coordinate_gs(&addr, req, self.rpc_timeout).await {
                Ok(_) => answers += 1,
                Err(e) => {
                    tracing::debug!(peer = %addr, error = %e, "Higher peer unreachable");
                }
            }
        }

        if answers == 0 {
            // No higher node is alive: take over and tell everyone.
            self.clock.tick();
            *self.leader.write().await = self.self_addr.clone();
            tracing::info!(node_id = self.self_id, addr = %self.self_addr, "Assuming leadership");

            let broadcasts = self.peers.snapshot().into_iter().map(|(addr, _)| {
                let req = CoordinationRequest {
                    node_id: self.self_id,
                    addr: self.self_addr.clone(),
                    msg_type: MsgType::Coordinate as i32,
                    clock: self.clock.tick(),
                };
                let rpc_timeout = self.rpc_timeout;
                async move {
                    if let Err(e) = client::coordinate_gs(&addr, req, rpc_timeout).await {
                        // Nodes that miss the announcement catch up
                        // through their own leader poll.
                        tracing::debug!(peer = %addr, error = %e, "Coordinate announcement not delivered");
                    }
                }
            });
            join_all(broadcasts).await;
        } else {
            tracing::debug!(
                node_id = self.self_id,
                answers,
                "Higher peer alive, standing down"
            );
        }

        tokio::time::sleep(self.settle).await;
        self.in_election.store(false, Ordering::SeqCst);
    }
}
