use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::grpc::client;
use crate::peers::PeerSet;

/// Batch completed job ids and report them to a grid scheduler.
///
/// Scheduler peers are tried in snapshot order until one accepts the
/// batch; if none is reachable the batch is retained and retried on the
/// next tick, so completions survive transient scheduler outages.
pub async fn run(
    mut completed_rx: mpsc::UnboundedReceiver<i64>,
    gs_peers: Arc<PeerSet>,
    interval: Duration,
    rpc_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut pending: Vec<i64> = Vec::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        while let Ok(id) = completed_rx.try_recv() {
            pending.push(id);
        }
        if pending.is_empty() {
            continue;
        }

        let mut delivered = false;
        for (addr, _) in gs_peers.snapshot() {
            match client::sync_completed_jobs(&addr, pending.clone(), rpc_timeout).await {
                Ok(()) => {
                    tracing::debug!(scheduler = %addr, count = pending.len(), "Completions reported");
                    delivered = true;
                    break;
                }
                Err(e) => {
                    tracing::debug!(scheduler = %addr, error = %e, "Completion report failed");
                }
            }
        }

        if delivered {
            pending.clear();
        } else {
            tracing::warn!(
                count = pending.len(),
                "No scheduler reachable, retrying completions next tick"
            );
        }
    }
}
