//! Leader election tests: steady state, failover, and term behavior.


use std::time::Duration;

use test_harness::{assert_eventually, TestCluster};

/// Exactly one leader emerges in a quiet three-node cluster and stays put.
#[tokio::test]
async fn test_single_leader_steady_state() {
    let mut cluster = TestCluster::new(3).await;

    cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("a leader should be elected");

    // Leadership settles: still exactly one leader after several heartbeat
    // intervals.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(cluster.count_leaders().await, 1);

    cluster.shutdown().await;
}

/// All peers converge on the leader's term once heartbeats flow.
#[tokio::test]
async fn test_terms_converge() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("a leader should be elected");
    let leader_term = cluster.get_node(leader_id).unwrap().current_term().await;

    assert_eventually(
        || async {
            for node in cluster.nodes.values() {
                if node.current_term().await != leader_term {
                    return false;
                }
            }
            true
        },
        Duration::from_secs(2),
        "all peers should adopt the leader's term",
    )
    .await;

    cluster.shutdown().await;
}

/// A new leader with a higher term emerges after the old leader crashes.
#[tokio::test]
async fn test_new_leader_after_crash() {
    let mut cluster = TestCluster::new(3).await;

    let initial_leader = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("initial leader should be elected");
    let initial_term = cluster
        .get_node(initial_leader)
        .unwrap()
        .current_term()
        .await;

    assert!(cluster.crash_node(initial_leader).await);

    let new_leader = cluster
        .wait_for_new_leader(initial_leader, Duration::from_secs(5))
        .await
        .expect("a new leader should be elected");

    assert_ne!(new_leader, initial_leader);
    let new_term = cluster.get_node(new_leader).unwrap().current_term().await;
    assert!(new_term > initial_term, "election must raise the term");
    assert_eq!(cluster.count_leaders().await, 1);

    cluster.shutdown().await;
}

/// An isolated node cannot win an election; the connected majority keeps a
/// leader.
#[tokio::test]
async fn test_isolated_node_cannot_lead() {
    let mut cluster = TestCluster::new(3).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("a leader should be elected");
    let follower = cluster
        .nodes
        .keys()
        .copied()
        .find(|&id| id != leader_id)
        .unwrap();

    cluster.isolate_node(follower).await;
    // The isolated node keeps timing out and restarting elections without
    // ever gathering a majority.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!cluster.get_node(follower).unwrap().is_leader().await);

    // The other two still have a working leader.
    let group: Vec<u64> = cluster
        .nodes
        .keys()
        .copied()
        .filter(|&id| id != follower)
        .collect();
    assert!(cluster
        .wait_for_leader_in_group(&group, Duration::from_secs(5))
        .await
        .is_some());

    cluster.shutdown().await;
}

/// A cluster of one elects itself.
#[tokio::test]
async fn test_single_node_cluster_elects_itself() {
    let mut cluster = TestCluster::new(1).await;

    let leader_id = cluster
        .wait_for_leader(Duration::from_secs(5))
        .await
        .expect("the only node should elect itself");
    assert_eq!(leader_id, 1);

    cluster.shutdown().await;
}
