//! Integration tests for the BMMC protocol.
//!
//! These tests run real clusters over the in-memory network and verify
//! end-to-end dissemination, callback delivery and membership gossip.

mod common;

use bimodal_multicast::testing::ChaosConfig;
use bimodal_multicast::{CallbackError, Element, Error, NO_CALLBACK};
use common::{addr, eventually, message_set, test_config, Cluster, CONVERGENCE_TIMEOUT};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn set(values: &[Value]) -> HashSet<Value> {
    values.iter().cloned().collect()
}

/// Two nodes exchange messages in both directions and run the callback
/// for each delivery.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_node_sync_with_callback() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let cluster = Cluster::build(2, ChaosConfig::default(), move |peer| {
        let counter = counter.clone();
        test_config(peer).with_callback(
            "my-callback",
            move |_: &Element| -> Result<(), CallbackError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
    });
    cluster.connect_full_mesh();

    cluster
        .node(0)
        .add_message(json!("first-message"), "my-callback")
        .unwrap();
    let expected = set(&[json!("first-message")]);
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);

    cluster
        .node(1)
        .add_message(json!("second-message"), "my-callback")
        .unwrap();
    let expected = set(&[json!("first-message"), json!("second-message")]);
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);

    // Each message runs the callback once at its origin and once at the receiver.
    assert!(eventually(CONVERGENCE_TIMEOUT, || calls.load(Ordering::SeqCst) == 4).await);
}

/// A failing callback is logged only; buffers still converge.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_node_sync_with_failing_callback() {
    let cluster = Cluster::build(2, ChaosConfig::default(), |peer| {
        test_config(peer).with_callback(
            "my-callback",
            |_: &Element| -> Result<(), CallbackError> { Err("callback failed".into()) },
        )
    });
    cluster.connect_full_mesh();

    cluster
        .node(0)
        .add_message(json!("first-message"), "my-callback")
        .unwrap();
    cluster
        .node(1)
        .add_message(json!("second-message"), "my-callback")
        .unwrap();

    let expected = set(&[json!("first-message"), json!("second-message")]);
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);
    assert!(cluster.nodes.iter().all(|n| n.stats().callback_failures >= 2));
}

/// A message from a random node of a star-connected cluster reaches everyone.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ten_node_star_from_random_source() {
    let cluster = Cluster::new(10);
    cluster.connect_star(0);

    let source = rand::rng().random_range(0..10);
    cluster
        .node(source)
        .add_message(json!("M"), NO_CALLBACK)
        .unwrap();

    let expected = set(&[json!("M")]);
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);
    for node in &cluster.nodes {
        assert_eq!(node.get_messages(), vec![json!("M")]);
    }
}

/// Messages from several independent sources all converge.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_independent_sources() {
    let cluster = Cluster::new(10);
    cluster.connect_star(0);

    for i in [2, 4, 6] {
        cluster
            .node(i)
            .add_message(json!(format!("m{}", i)), NO_CALLBACK)
            .unwrap();
    }

    let expected = set(&[json!("m2"), json!("m4"), json!("m6")]);
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);
}

/// Membership spreads through add-peer elements: leaves of a star learn
/// about each other.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_membership_gossip() {
    let cluster = Cluster::new(5);
    cluster.connect_star(0);

    assert!(
        eventually(CONVERGENCE_TIMEOUT, || {
            cluster.nodes.iter().all(|n| n.get_peers().len() == 4)
        })
        .await
    );
    for (i, node) in cluster.nodes.iter().enumerate() {
        assert!(!node.get_peers().contains(&addr(i)), "node {} lists itself", i);
    }
}

/// Removing a peer propagates to every node.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_remove_peer_propagates() {
    let cluster = Cluster::new(4);
    cluster.connect_full_mesh();

    // Let every add-peer announcement settle so none can re-add the peer.
    assert!(
        eventually(CONVERGENCE_TIMEOUT, || {
            cluster.nodes.iter().all(|n| n.stats().buffered == 12)
        })
        .await
    );

    cluster.node(0).remove_peer(addr(3)).unwrap();
    assert!(
        eventually(CONVERGENCE_TIMEOUT, || {
            cluster.nodes[..3]
                .iter()
                .all(|n| !n.get_peers().contains(&addr(3)))
        })
        .await
    );
}

/// Adding the same peer twice is a no-op for the peer buffer.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_add_peer_idempotent() {
    let cluster = Cluster::new(2);
    let node = cluster.node(0);

    assert!(node.add_peer(addr(1)).unwrap());
    assert!(!node.add_peer(addr(1)).unwrap());
    assert_eq!(node.get_peers(), vec![addr(1)]);
    assert!(node.get_messages().is_empty());
}

/// Convergence still happens when a fifth of all envelopes are lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_convergence_under_message_loss() {
    let cluster = Cluster::with_chaos(6, ChaosConfig::new().with_message_loss_rate(0.2));
    cluster.connect_full_mesh();

    let mut expected = HashSet::new();
    for i in 0..6 {
        let msg = json!({"from": i, "seq": 1});
        cluster.node(i).add_message(msg.clone(), NO_CALLBACK).unwrap();
        expected.insert(msg);
    }

    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);
    assert!(cluster.network.stats().messages_dropped > 0);
}

/// A node cut off by a partition catches up once the partition heals.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partition_heals() {
    let cluster = Cluster::new(4);
    cluster.connect_full_mesh();

    let others: Vec<String> = (0..3).map(addr).collect();
    cluster
        .network
        .partition()
        .isolate(&addr(3), others.iter().map(String::as_str));

    cluster.node(0).add_message(json!("during"), NO_CALLBACK).unwrap();
    let expected = set(&[json!("during")]);
    assert!(
        eventually(CONVERGENCE_TIMEOUT, || {
            cluster.nodes[..3].iter().all(|n| message_set(n) == expected)
        })
        .await
    );
    assert!(cluster.node(3).get_messages().is_empty());

    cluster.network.partition().heal_all();
    assert!(eventually(CONVERGENCE_TIMEOUT, || cluster.all_have(&expected)).await);
}

/// Old messages fall out of a small buffer on every node.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_small_buffer_keeps_newest() {
    let cluster = Cluster::build(2, ChaosConfig::default(), |peer| {
        test_config(peer).with_buffer_size(3)
    });
    cluster.connect_full_mesh();

    for i in 1..=4 {
        cluster
            .node(0)
            .add_message(json!(format!("m{}", i)), NO_CALLBACK)
            .unwrap();
    }

    let expected = set(&[json!("m2"), json!("m3"), json!("m4")]);
    assert_eq!(message_set(cluster.node(0)), expected);
    assert!(eventually(CONVERGENCE_TIMEOUT, || message_set(cluster.node(1)) == expected).await);
}

/// Lifecycle errors surface to the caller.
#[tokio::test]
async fn test_lifecycle_errors() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);

    assert!(node.is_running());
    assert!(matches!(node.start(), Err(Error::AlreadyStarted)));

    node.stop();
    assert!(!node.is_running());
    assert!(matches!(node.start(), Err(Error::Shutdown)));
}

/// The gossip round advances while the node runs.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_round_advances() {
    let cluster = Cluster::new(1);
    let node = cluster.node(0);
    assert!(eventually(CONVERGENCE_TIMEOUT, || node.round() >= 3).await);
}
