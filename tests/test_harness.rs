//! Test harness for multi-node grid clusters.
//!
//! Boots a real discovery service plus grid scheduler and resource
//! manager nodes on localhost ports, with shortened protocol timings so
//! elections and scheduling converge quickly.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vgrid::config::{GsConfig, RmConfig};
use vgrid::discovery::{self, Registry};
use vgrid::gs::GridScheduler;
use vgrid::jobs::JobStatus;
use vgrid::rm::ResourceManager;

/// Scheduler config with shortened timings for fast tests.
pub fn test_gs_config(node_id: u64, port: u16, discovery_port: u16) -> GsConfig {
    GsConfig {
        node_id,
        listen_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        discovery_addr: format!("127.0.0.1:{discovery_port}"),
        rpc_timeout_ms: 200,
        mutex_obtain_timeout_ms: 500,
        election_settle_ms: 100,
        leader_poll_interval_ms: 100,
        schedule_interval_ms: 100,
        task_loop_interval_ms: 20,
        cs_slice_us: 1_000,
        heartbeat_interval_ms: 200,
    }
}

pub fn test_rm_config(node_id: u64, port: u16, discovery_port: u16, workers: usize) -> RmConfig {
    RmConfig {
        node_id,
        listen_addr: format!("127.0.0.1:{port}").parse().unwrap(),
        discovery_addr: format!("127.0.0.1:{discovery_port}"),
        workers,
        rpc_timeout_ms: 200,
        report_interval_ms: 50,
        heartbeat_interval_ms: 200,
    }
}

pub struct TestGs {
    pub node: Arc<GridScheduler>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestGs {
    pub fn addr(&self) -> String {
        self.node.advertised_addr()
    }
}

impl Drop for TestGs {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

pub struct TestRm {
    pub node: Arc<ResourceManager>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for TestRm {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// A running cluster: one discovery service, `gss` schedulers, and any
/// resource managers added afterwards.
pub struct TestCluster {
    pub gss: Vec<TestGs>,
    pub rms: Vec<TestRm>,
    base_port: u16,
    next_port: u16,
    discovery_cancel: CancellationToken,
    discovery_handle: JoinHandle<()>,
}

impl TestCluster {
    /// Start discovery on `base_port` and `num_gs` schedulers on the
    /// ports above it. Scheduler ids are 0..num_gs in start order.
    pub async fn new(num_gs: usize, base_port: u16) -> Self {
        let discovery_cancel = CancellationToken::new();
        let registry = Arc::new(Registry::new(Duration::from_secs(5)));
        let discovery_addr = format!("127.0.0.1:{base_port}").parse().unwrap();
        let cancel = discovery_cancel.clone();
        let discovery_handle = tokio::spawn(async move {
            if let Err(e) = discovery::serve_with_registry(discovery_addr, registry, cancel).await {
                tracing::error!(error = %e, "Discovery service failed");
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut cluster = Self {
            gss: Vec::new(),
            rms: Vec::new(),
            base_port,
            next_port: base_port + 1,
            discovery_cancel,
            discovery_handle,
        };
        for id in 0..num_gs {
            cluster.add_gs(id as u64).await;
        }
        cluster
    }

    pub async fn add_gs(&mut self, node_id: u64) {
        let port = self.next_port;
        self.next_port += 1;

        let config = test_gs_config(node_id, port, self.base_port);
        let (node, runner) = GridScheduler::new(config);
        let cancel = CancellationToken::new();
        let run_node = node.clone();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_node.run(runner, run_cancel).await {
                tracing::error!(error = %e, "Scheduler node failed");
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.gss.push(TestGs {
            node,
            cancel,
            handle,
        });
    }

    pub async fn add_rm(&mut self, node_id: u64, workers: usize) {
        let port = self.next_port;
        self.next_port += 1;

        let config = test_rm_config(node_id, port, self.base_port, workers);
        let (node, completed_rx) = ResourceManager::new(config);
        let cancel = CancellationToken::new();
        let run_node = node.clone();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_node.run(completed_rx, run_cancel).await {
                tracing::error!(error = %e, "Resource manager node failed");
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        self.rms.push(TestRm {
            node,
            cancel,
            handle,
        });
    }

    /// Stop a scheduler, simulating a crash. Its port stays dark.
    pub fn kill_gs(&mut self, idx: usize) -> String {
        let gs = self.gss.remove(idx);
        let addr = gs.addr();
        drop(gs);
        addr
    }

    /// The leader address every live scheduler currently agrees on, if
    /// there is exactly one.
    pub async fn agreed_leader(&self) -> Option<String> {
        let mut agreed: Option<String> = None;
        for gs in &self.gss {
            let leader = gs.node.current_leader().await;
            if leader.is_empty() {
                return None;
            }
            match &agreed {
                None => agreed = Some(leader),
                Some(prev) if *prev == leader => {}
                Some(_) => return None,
            }
        }
        agreed
    }

    /// Wait until every live scheduler agrees on one leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<String> {
        let agreed = wait_for(
            || async { self.agreed_leader().await.is_some() },
            timeout,
            Duration::from_millis(25),
        )
        .await;
        if agreed {
            self.agreed_leader().await
        } else {
            None
        }
    }

    /// Count jobs with the given status on the scheduler at `idx`.
    pub async fn count_status(&self, idx: usize, status: JobStatus) -> usize {
        self.gss[idx]
            .node
            .jobs_snapshot()
            .await
            .iter()
            .filter(|j| j.status == status)
            .count()
    }

    /// True when every scheduler holds the same set of job ids.
    pub async fn job_ids_converged(&self, expected: usize) -> bool {
        let mut reference: Option<Vec<i64>> = None;
        for gs in &self.gss {
            let mut ids: Vec<i64> = gs
                .node
                .jobs_snapshot()
                .await
                .iter()
                .map(|j| j.id)
                .collect();
            ids.sort_unstable();
            if ids.len() != expected {
                return false;
            }
            match &reference {
                None => reference = Some(ids),
                Some(prev) => {
                    if *prev != ids {
                        return false;
                    }
                }
            }
        }
        reference.is_some()
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.discovery_cancel.cancel();
        self.discovery_handle.abort();
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration, poll: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout, Duration::from_millis(25)).await;
    assert!(result, "{}", message);
}
