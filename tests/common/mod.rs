//! Shared test utilities for bimodal-multicast integration tests.
//!
//! Builds clusters of nodes on a [`MemoryNetwork`], with every node's
//! inbound queue served by a background task.

#![allow(dead_code)]

use bimodal_multicast::testing::{serve, ChaosConfig, MemoryNetwork, MemoryPeer};
use bimodal_multicast::{Bmmc, Config};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

/// Round duration used by test clusters.
pub const TEST_ROUND: Duration = Duration::from_millis(20);

/// Upper bound for convergence checks.
pub const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Install a tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Address of the `i`-th node in a test cluster.
pub fn addr(i: usize) -> String {
    format!("node-{}", i)
}

/// Default configuration for a test node.
pub fn test_config(peer: MemoryPeer) -> Config<MemoryPeer> {
    Config::new(peer, 256)
        .with_beta(0.5)
        .with_round_duration(TEST_ROUND)
        .with_send_timeout(Duration::from_secs(1))
}

/// A set of started nodes sharing one in-memory network.
pub struct Cluster {
    pub network: MemoryNetwork,
    pub nodes: Vec<Bmmc<MemoryPeer>>,
}

impl Cluster {
    /// Start `size` nodes with the default test configuration.
    pub fn new(size: usize) -> Self {
        Self::with_chaos(size, ChaosConfig::default())
    }

    /// Start `size` nodes on a network applying `chaos`.
    pub fn with_chaos(size: usize, chaos: ChaosConfig) -> Self {
        Self::build(size, chaos, test_config)
    }

    /// Start `size` nodes, customizing each configuration with `configure`.
    pub fn build(
        size: usize,
        chaos: ChaosConfig,
        configure: impl Fn(MemoryPeer) -> Config<MemoryPeer>,
    ) -> Self {
        init_tracing();
        let network = MemoryNetwork::with_chaos(chaos);
        let nodes = (0..size)
            .map(|i| {
                let (peer, inbound) = network.register(addr(i));
                let node = Bmmc::new(configure(peer)).expect("valid test config");
                tokio::spawn(serve(node.clone(), inbound));
                node.start().expect("node starts");
                node
            })
            .collect();
        Self { network, nodes }
    }

    /// Node `i`.
    pub fn node(&self, i: usize) -> &Bmmc<MemoryPeer> {
        &self.nodes[i]
    }

    /// Every node knows every other node.
    pub fn connect_full_mesh(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            for j in 0..self.nodes.len() {
                if i != j {
                    node.add_peer(addr(j)).expect("add peer");
                }
            }
        }
    }

    /// Node `hub` knows everyone, everyone else knows only `hub`.
    pub fn connect_star(&self, hub: usize) {
        for i in 0..self.nodes.len() {
            if i != hub {
                self.nodes[hub].add_peer(addr(i)).expect("add peer");
                self.nodes[i].add_peer(addr(hub)).expect("add peer");
            }
        }
    }

    /// True when every node's user messages equal `expected` as a set.
    pub fn all_have(&self, expected: &HashSet<Value>) -> bool {
        self.nodes.iter().all(|n| message_set(n) == *expected)
    }

    /// Stop every node.
    pub fn stop(&self) {
        for node in &self.nodes {
            node.stop();
        }
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.stop();
    }
}

/// User messages of `node` as a set.
pub fn message_set(node: &Bmmc<MemoryPeer>) -> HashSet<Value> {
    node.get_messages().into_iter().collect()
}

/// Poll `cond` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
