use std::net::SocketAddr;

/// Configuration for a grid scheduler node. All protocol timings are
/// fields so integration tests can shorten them.
#[derive(Debug, Clone)]
pub struct GsConfig {
    pub node_id: u64,
    pub listen_addr: SocketAddr,
    /// host:port of the discovery service
    pub discovery_addr: String,
    /// Upper bound on a single outbound dial + call
    pub rpc_timeout_ms: u64,
    /// How long obtain() waits for mutex grants before proceeding
    pub mutex_obtain_timeout_ms: u64,
    /// Tail sleep after an election to absorb concurrent triggers
    pub election_settle_ms: u64,
    pub leader_poll_interval_ms: u64,
    pub schedule_interval_ms: u64,
    pub task_loop_interval_ms: u64,
    /// Bound on how long the critical section is held per acquisition
    pub cs_slice_us: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for GsConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            listen_addr: "127.0.0.1:7101".parse().unwrap(),
            discovery_addr: "127.0.0.1:7000".to_string(),
            rpc_timeout_ms: 500,
            mutex_obtain_timeout_ms: 2_000,
            election_settle_ms: 1_000,
            leader_poll_interval_ms: 1_000,
            schedule_interval_ms: 1_000,
            task_loop_interval_ms: 100,
            cs_slice_us: 1_000,
            heartbeat_interval_ms: 1_000,
        }
    }
}

impl GsConfig {
    pub fn new(node_id: u64, listen_addr: SocketAddr, discovery_addr: String) -> Self {
        Self {
            node_id,
            listen_addr,
            discovery_addr,
            ..Default::default()
        }
    }

    /// The endpoint peers use to reach this node. Identity on the wire is
    /// this string, not the numeric id.
    pub fn advertised_addr(&self) -> String {
        self.listen_addr.to_string()
    }
}

/// Configuration for a resource manager node.
#[derive(Debug, Clone)]
pub struct RmConfig {
    pub node_id: u64,
    pub listen_addr: SocketAddr,
    pub discovery_addr: String,
    /// Fixed size of the worker pool
    pub workers: usize,
    pub rpc_timeout_ms: u64,
    /// Completion batch flush interval
    pub report_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
}

impl Default for RmConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            listen_addr: "127.0.0.1:7201".parse().unwrap(),
            discovery_addr: "127.0.0.1:7000".to_string(),
            workers: 4,
            rpc_timeout_ms: 500,
            report_interval_ms: 100,
            heartbeat_interval_ms: 1_000,
        }
    }
}

impl RmConfig {
    pub fn new(
        node_id: u64,
        listen_addr: SocketAddr,
        discovery_addr: String,
        workers: usize,
    ) -> Self {
        Self {
            node_id,
            listen_addr,
            discovery_addr,
            workers,
            ..Default::default()
        }
    }

    pub fn advertised_addr(&self) -> String {
        self.listen_addr.to_string()
    }
}

/// Configuration for the discovery service.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub listen_addr: SocketAddr,
    /// Nodes that have not polled within this window are dropped from
    /// probe responses.
    pub liveness_window_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7000".parse().unwrap(),
            liveness_window_ms: 5_000,
        }
    }
}
