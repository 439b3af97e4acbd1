//! Distributed mutual exclusion over the grid scheduler peers,
//! Ricart-Agrawala style: a node wanting the critical section asks every
//! peer for permission, stamped with its Lamport clock; peers grant
//! immediately unless they hold the section or want it with an earlier
//! stamp, in which case the grant is deferred until release.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clock::LamportClock;
use crate::grpc::client;
use crate::peers::PeerSet;
use crate::proto::{CoordinationRequest, MsgType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MutexState {
    Released = 0,
    Wanted = 1,
    Held = 2,
}

impl MutexState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => MutexState::Wanted,
            2 => MutexState::Held,
            _ => MutexState::Released,
        }
    }
}

/// What to do with an inbound permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Grant,
    Defer,
}

/// A grant we owe a peer once we leave the critical section.
#[derive(Debug)]
pub struct DeferredGrant {
    pub addr: String,
}

/// The handler-facing half of the mutex engine.
///
/// gRPC handlers never touch the state machine directly; they read the
/// atomics to classify an inbound request and push onto the two queues
/// whose receiving ends are owned by the critical-section runner.
#[derive(Debug)]
pub struct MutexShared {
    state: AtomicU8,
    req_clock: AtomicU64,
    resp_tx: mpsc::Sender<u64>,
    defer_tx: mpsc::UnboundedSender<DeferredGrant>,
}

impl MutexShared {
    pub fn state(&self) -> MutexState {
        MutexState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: MutexState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Classify an inbound permission request against our own state.
    ///
    /// `later` means the incoming request is ordered after our pending
    /// one in the Lamport order with id tie-break; such requests wait
    /// while we are wanting, and everything waits while we hold.
    pub fn disposition(&self, self_id: u64, req_id: u64, req_clock: u64) -> Disposition {
        match self.state() {
            MutexState::Held => Disposition::Defer,
            MutexState::Wanted => {
                let ours = self.req_clock.load(Ordering::SeqCst);
                let later = ours < req_clock || (ours == req_clock && self_id < req_id);
                if later {
                    Disposition::Defer
                } else {
                    Disposition::Grant
                }
            }
            MutexState::Released => Disposition::Grant,
        }
    }

    /// Queue a grant to be sent when the critical section is released.
    pub fn defer(&self, addr: String) {
        let _ = self.defer_tx.send(DeferredGrant { addr });
    }

    /// Record an inbound grant token. Overflow beyond the channel bound
    /// is dropped; obtain() drains strays before and after each wait.
    pub fn on_response(&self, clock: u64) {
        let _ = self.resp_tx.try_send(clock);
    }
}

/// The runner-facing half: owns the receiving ends and drives the
/// request/release cycle. Exactly one task (the CS runner) calls
/// `obtain`/`release`, never concurrently.
pub struct MutexEngine {
    shared: Arc<MutexShared>,
    resp_rx: mpsc::Receiver<u64>,
    defer_rx: mpsc::UnboundedReceiver<DeferredGrant>,
    clock: Arc<LamportClock>,
    peers: Arc<PeerSet>,
    self_id: u64,
    self_addr: String,
    obtain_timeout: Duration,
    rpc_timeout: Duration,
}

impl MutexEngine {
    pub fn new(
        clock: Arc<LamportClock>,
        peers: Arc<PeerSet>,
        self_id: u64,
        self_addr: String,
        obtain_timeout: Duration,
        rpc_timeout: Duration,
    ) -> (Self, Arc<MutexShared>) {
        let (resp_tx, resp_rx) = mpsc::channel(64);
        let (defer_tx, defer_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(MutexShared {
            state: AtomicU8::new(MutexState::Released as u8),
            req_clock: AtomicU64::new(0),
            resp_tx,
            defer_tx,
        });
        let engine = Self {
            shared: shared.clone(),
            resp_rx,
            defer_rx,
            clock,
            peers,
            self_id,
            self_addr,
            obtain_timeout,
            rpc_timeout,
        };
        (engine, shared)
    }

    /// Acquire the cluster-wide critical section.
    ///
    /// Asks every known peer for permission and waits for as many grants
    /// as there were successfully delivered requests, up to the obtain
    /// timeout. Peers that vanished after accepting the request forfeit
    /// their veto when the timeout elapses.
    pub async fn obtain(&mut self) {
        let state = self.shared.state();
        if state != MutexState::Released {
            panic!("mutex obtain from {state:?}, expected released");
        }
        self.shared.set_state(MutexState::Wanted);

        // Stale grants from a previous round must not count here
        while self.resp_rx.try_recv().is_ok() {}

        let stamp = self.clock.tick();
        self.shared.req_clock.store(stamp, Ordering::SeqCst);

        let mut successes = 0usize;
        for (addr, _) in self.peers.snapshot() {
            let req = CoordinationRequest {
                node_id: self.self_id,
                addr: self.self_addr.clone(),
                msg_type: MsgType::MutexRequest as i32,
                clock: stamp,
            };
            match client::coordinate_gs(&addr, req, self.rpc_timeout).await {
                Ok(_) => successes += 1,
                Err(e) => {
                    tracing::debug!(peer = %addr, error = %e, "Mutex request not delivered");
                }
            }
        }

        let deadline = tokio::time::Instant::now() + self.obtain_timeout;
        let mut granted = 0usize;
        while granted < successes {
            match tokio::time::timeout_at(deadline, self.resp_rx.recv()).await {
                Ok(Some(_)) => granted += 1,
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        granted,
                        expected = successes,
                        "Timed out waiting for mutex grants, entering anyway"
                    );
                    break;
                }
            }
        }

        while self.resp_rx.try_recv().is_ok() {}
        self.shared.set_state(MutexState::Held);
        tracing::debug!(node_id = self.self_id, stamp, "Entered critical section");
    }

    /// Leave the critical section and send every deferred grant, oldest
    /// first. Delivery failures are logged; the peer's obtain timeout
    /// covers for us.
    pub async fn release(&mut self) {
        self.shared.set_state(MutexState::Released);

        while let Ok(grant) = self.defer_rx.try_recv() {
            let req = CoordinationRequest {
                node_id: self.self_id,
                addr: self.self_addr.clone(),
                msg_type: MsgType::MutexResponse as i32,
                clock: self.clock.tick(),
            };
            if let Err(e) = client::coordinate_gs(&grant.addr, req, self.rpc_timeout).await {
                tracing::warn!(peer = %grant.addr, error = %e, "Deferred mutex grant not delivered");
            }
        }
        tracing::debug!(node_id = self.self_id, "Left critical section");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (MutexEngine, Arc<MutexShared>) {
        MutexEngine::new(
            Arc::new(LamportClock::new()),
            Arc::new(PeerSet::new()),
            1,
            "127.0.0.1:7101".to_string(),
            Duration::from_millis(100),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_released_grants_immediately() {
        let (_engine, shared) = engine();
        assert_eq!(shared.state(), MutexState::Released);
        assert_eq!(shared.disposition(1, 2, 10), Disposition::Grant);
    }

    #[test]
    fn test_held_defers_everything() {
        let (_engine, shared) = engine();
        shared.set_state(MutexState::Held);
        assert_eq!(shared.disposition(1, 2, 0), Disposition::Defer);
    }

    #[test]
    fn test_wanted_defers_later_requests_only() {
        let (_engine, shared) = engine();
        shared.set_state(MutexState::Wanted);
        shared.req_clock.store(5, Ordering::SeqCst);

        // Incoming request stamped after ours waits
        assert_eq!(shared.disposition(1, 2, 6), Disposition::Defer);
        // Incoming request stamped before ours wins
        assert_eq!(shared.disposition(1, 2, 4), Disposition::Grant);
    }

    #[test]
    fn test_wanted_tie_breaks_on_id() {
        let (_engine, shared) = engine();
        shared.set_state(MutexState::Wanted);
        shared.req_clock.store(5, Ordering::SeqCst);

        // Same stamp: the higher id yields to the lower id
        assert_eq!(shared.disposition(1, 2, 5), Disposition::Defer);
        assert_eq!(shared.disposition(2, 1, 5), Disposition::Grant);
    }

    #[tokio::test]
    async fn test_obtain_with_no_peers_enters_immediately() {
        let (mut engine, shared) = engine();
        engine.obtain().await;
        assert_eq!(shared.state(), MutexState::Held);
        engine.release().await;
        assert_eq!(shared.state(), MutexState::Released);
    }

    #[tokio::test]
    async fn test_deferred_grants_drain_in_fifo_order() {
        let (mut engine, shared) = engine();
        shared.defer("127.0.0.1:7102".to_string());
        shared.defer("127.0.0.1:7103".to_string());

        let first = engine.defer_rx.try_recv().unwrap();
        let second = engine.defer_rx.try_recv().unwrap();
        assert_eq!(first.addr, "127.0.0.1:7102");
        assert_eq!(second.addr, "127.0.0.1:7103");
    }

    #[tokio::test]
    #[should_panic(expected = "mutex obtain")]
    async fn test_double_obtain_is_fatal() {
        let (mut engine, _shared) = engine();
        engine.obtain().await;
        engine.obtain().await;
    }
}
