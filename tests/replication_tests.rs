//! Jobs-list replication: submissions through any scheduler end up on
//! every scheduler, including under concurrent writers.

mod test_harness;

use std::time::Duration;

use test_harness::{assert_eventually, TestCluster};
use vgrid::grpc::client;
use vgrid::jobs::job::batch_to_proto;
use vgrid::jobs::{Job, JobStatus};

const RPC_TIMEOUT: Duration = Duration::from_secs(1);

fn batch(ids: std::ops::Range<i64>) -> Vec<Job> {
    ids.map(|id| Job::new(id, 1)).collect()
}

#[tokio::test]
async fn test_submission_to_follower_reaches_all_schedulers() {
    let cluster = TestCluster::new(3, 17100).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Cluster should elect a leader");

    // gs 0 is a follower (highest id leads); submit through it anyway
    let follower = cluster.gss[0].addr();
    client::add_jobs(&follower, batch_to_proto(&batch(1..6)), RPC_TIMEOUT)
        .await
        .expect("Submission should be accepted");

    assert_eventually(
        || async { cluster.job_ids_converged(5).await },
        Duration::from_secs(5),
        "All schedulers should hold the submitted jobs",
    )
    .await;

    // No resource manager is registered, so nothing gets dispatched
    for idx in 0..3 {
        assert_eq!(cluster.count_status(idx, JobStatus::Waiting).await, 5);
    }
}

#[tokio::test]
async fn test_concurrent_submissions_converge() {
    let cluster = TestCluster::new(2, 17120).await;
    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("Cluster should elect a leader");

    let addr_a = cluster.gss[0].addr();
    let addr_b = cluster.gss[1].addr();

    // Both schedulers take writes at the same time; the distributed
    // mutex serializes the appends and each one replicates its batch.
    let (ra, rb) = tokio::join!(
        client::add_jobs(&addr_a, batch_to_proto(&batch(1..6)), RPC_TIMEOUT),
        client::add_jobs(&addr_b, batch_to_proto(&batch(101..106)), RPC_TIMEOUT),
    );
    ra.expect("Submission to first scheduler should be accepted");
    rb.expect("Submission to second scheduler should be accepted");

    assert_eventually(
        || async { cluster.job_ids_converged(10).await },
        Duration::from_secs(10),
        "Both schedulers should converge on the same ten jobs",
    )
    .await;
}

#[tokio::test]
async fn test_empty_submission_is_rejected() {
    let cluster = TestCluster::new(1, 17140).await;
    cluster
        .wait_for_leader(Duration::from_secs(3))
        .await
        .expect("Lone scheduler should become leader");

    let addr = cluster.gss[0].addr();
    let result = client::add_jobs(&addr, Vec::new(), RPC_TIMEOUT).await;
    assert!(result.is_err(), "Empty batches should be refused");
}
