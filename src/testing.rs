//! In-memory network and chaos utilities for BMMC clusters.
//!
//! [`MemoryNetwork`] connects any number of nodes inside one process. Each
//! registered address gets a [`MemoryPeer`] (the node's outbound side) and a
//! receiver of [`Inbound`] envelopes (its inbound side), which
//! [`serve`] feeds into a node's handlers.
//!
//! ## Features
//!
//! - **Message Loss**: Randomly drop envelopes with configurable probability
//! - **Latency Injection**: Delay deliveries by a base latency plus jitter
//! - **Network Partitions**: Block traffic between pairs of nodes
//!
//! ## Example
//!
//! ```ignore
//! use bimodal_multicast::testing::{serve, ChaosConfig, MemoryNetwork};
//! use bimodal_multicast::{Bmmc, Config};
//!
//! let network = MemoryNetwork::with_chaos(ChaosConfig::new().with_message_loss_rate(0.2));
//! let (peer, inbound) = network.register("node-1");
//! let node = Bmmc::new(Config::new(peer, 1024))?;
//! tokio::spawn(serve(node.clone(), inbound));
//! node.start()?;
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures_timer::Delay;
use parking_lot::RwLock;
use rand::Rng;

use crate::bmmc::Bmmc;
use crate::transport::{Peer, Route};

/// Capacity of each node's inbound queue.
const INBOUND_QUEUE_SIZE: usize = 4096;

/// Configuration for chaos testing.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    /// Probability of dropping an envelope (0.0 to 1.0).
    pub message_loss_rate: f64,

    /// Additional latency added to every delivery.
    pub base_latency: Duration,

    /// Random jitter added to latency (0 to this value).
    pub latency_jitter: Duration,

    /// Whether chaos is applied at all.
    pub enabled: bool,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            message_loss_rate: 0.0,
            base_latency: Duration::ZERO,
            latency_jitter: Duration::ZERO,
            enabled: false,
        }
    }
}

impl ChaosConfig {
    /// Create a chaos configuration with defaults (no chaos).
    pub fn new() -> Self {
        Self::default()
    }

    /// Moderate failure testing.
    ///
    /// - 5% message loss
    /// - 2ms base latency with 5ms jitter
    pub fn moderate() -> Self {
        Self {
            message_loss_rate: 0.05,
            base_latency: Duration::from_millis(2),
            latency_jitter: Duration::from_millis(5),
            enabled: true,
        }
    }

    /// Aggressive failure testing.
    ///
    /// - 20% message loss
    /// - 5ms base latency with 20ms jitter
    pub fn aggressive() -> Self {
        Self {
            message_loss_rate: 0.20,
            base_latency: Duration::from_millis(5),
            latency_jitter: Duration::from_millis(20),
            enabled: true,
        }
    }

    /// Set the message loss rate (0.0 to 1.0).
    pub fn with_message_loss_rate(mut self, rate: f64) -> Self {
        self.message_loss_rate = rate.clamp(0.0, 1.0);
        self.enabled = true;
        self
    }

    /// Set the base latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.base_latency = latency;
        self.enabled = true;
        self
    }

    /// Set the latency jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.latency_jitter = jitter;
        self.enabled = true;
        self
    }

    /// Enable or disable chaos.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check if an envelope should be dropped.
    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.message_loss_rate == 0.0 {
            return false;
        }
        rand::rng().random::<f64>() < self.message_loss_rate
    }

    /// Latency to apply to one delivery (base + random jitter).
    pub fn get_latency(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        let jitter = if self.latency_jitter > Duration::ZERO {
            let jitter_ms = rand::rng().random_range(0..=self.latency_jitter.as_millis() as u64);
            Duration::from_millis(jitter_ms)
        } else {
            Duration::ZERO
        };
        self.base_latency + jitter
    }
}

/// Pairs of nodes that cannot reach each other.
#[derive(Debug, Default)]
pub struct NetworkPartition {
    partitioned: RwLock<HashSet<(String, String)>>,
    active: AtomicBool,
}

impl NetworkPartition {
    /// Create a partition controller with no partitions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Block traffic between two nodes in both directions.
    pub fn partition(&self, node_a: &str, node_b: &str) {
        let mut partitioned = self.partitioned.write();
        partitioned.insert((node_a.to_string(), node_b.to_string()));
        partitioned.insert((node_b.to_string(), node_a.to_string()));
        self.active.store(true, Ordering::Release);
    }

    /// Isolate one node from every node in `others`.
    pub fn isolate<'a>(&self, node: &str, others: impl IntoIterator<Item = &'a str>) {
        for other in others {
            self.partition(node, other);
        }
    }

    /// Remove every partition.
    pub fn heal_all(&self) {
        self.partitioned.write().clear();
        self.active.store(false, Ordering::Release);
    }

    /// Check if `from` cannot reach `to`.
    pub fn is_partitioned(&self, from: &str, to: &str) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        self.partitioned
            .read()
            .contains(&(from.to_string(), to.to_string()))
    }
}

/// Delivery statistics of a [`MemoryNetwork`].
#[derive(Debug, Default)]
struct ChaosStats {
    messages_total: AtomicU64,
    messages_dropped: AtomicU64,
    messages_partitioned: AtomicU64,
    messages_delayed: AtomicU64,
}

/// Snapshot of network statistics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChaosStatsSnapshot {
    /// Envelopes handed to the network.
    pub messages_total: u64,
    /// Envelopes dropped by the loss rate or lost to a closed receiver.
    pub messages_dropped: u64,
    /// Envelopes blocked by a partition.
    pub messages_partitioned: u64,
    /// Envelopes delivered with added latency.
    pub messages_delayed: u64,
}

impl ChaosStatsSnapshot {
    /// Fraction of envelopes that were not dropped or blocked.
    pub fn delivery_rate(&self) -> f64 {
        if self.messages_total == 0 {
            return 1.0;
        }
        let failed = self.messages_dropped + self.messages_partitioned;
        1.0 - (failed as f64 / self.messages_total as f64)
    }
}

/// Envelope delivered to a registered node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Sender address.
    pub from: String,
    /// Route the envelope was sent on.
    pub route: Route,
    /// Encoded envelope.
    pub payload: Bytes,
}

/// Error type for [`MemoryPeer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryNetworkError {
    /// No node is registered under the destination address.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// The destination node stopped accepting envelopes.
    #[error("peer {0} is not accepting envelopes")]
    Closed(String),
}

#[derive(Debug, Default)]
struct NetworkInner {
    nodes: RwLock<HashMap<String, async_channel::Sender<Inbound>>>,
    chaos: RwLock<ChaosConfig>,
    partition: NetworkPartition,
    stats: ChaosStats,
}

/// In-process network connecting [`MemoryPeer`]s.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Create a lossless network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a network with chaos applied to every delivery.
    pub fn with_chaos(chaos: ChaosConfig) -> Self {
        let network = Self::new();
        network.set_chaos(chaos);
        network
    }

    /// Replace the chaos configuration.
    pub fn set_chaos(&self, chaos: ChaosConfig) {
        *self.inner.chaos.write() = chaos;
    }

    /// Partition controller.
    pub fn partition(&self) -> &NetworkPartition {
        &self.inner.partition
    }

    /// Register `addr`, returning its outbound peer and inbound receiver.
    ///
    /// Registering an address again replaces the previous receiver.
    pub fn register(
        &self,
        addr: impl Into<String>,
    ) -> (MemoryPeer, async_channel::Receiver<Inbound>) {
        let addr = addr.into();
        let (tx, rx) = async_channel::bounded(INBOUND_QUEUE_SIZE);
        self.inner.nodes.write().insert(addr.clone(), tx);
        let peer = MemoryPeer {
            addr,
            network: self.clone(),
        };
        (peer, rx)
    }

    /// Remove `addr` from the network. Later sends to it fail.
    pub fn unregister(&self, addr: &str) -> bool {
        match self.inner.nodes.write().remove(addr) {
            Some(tx) => {
                tx.close();
                true
            }
            None => false,
        }
    }

    /// Registered addresses. Order is unspecified.
    pub fn addresses(&self) -> Vec<String> {
        self.inner.nodes.read().keys().cloned().collect()
    }

    /// Current delivery statistics.
    pub fn stats(&self) -> ChaosStatsSnapshot {
        let stats = &self.inner.stats;
        ChaosStatsSnapshot {
            messages_total: stats.messages_total.load(Ordering::Relaxed),
            messages_dropped: stats.messages_dropped.load(Ordering::Relaxed),
            messages_partitioned: stats.messages_partitioned.load(Ordering::Relaxed),
            messages_delayed: stats.messages_delayed.load(Ordering::Relaxed),
        }
    }

    async fn deliver(&self, from: &str, to: &str, route: Route, payload: Bytes) -> Result<(), MemoryNetworkError> {
        let stats = &self.inner.stats;
        stats.messages_total.fetch_add(1, Ordering::Relaxed);

        let tx = self
            .inner
            .nodes
            .read()
            .get(to)
            .cloned()
            .ok_or_else(|| MemoryNetworkError::UnknownPeer(to.to_string()))?;

        if self.inner.partition.is_partitioned(from, to) {
            stats.messages_partitioned.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let latency = {
            let chaos = self.inner.chaos.read();
            if chaos.should_drop() {
                stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            chaos.get_latency()
        };

        let inbound = Inbound {
            from: from.to_string(),
            route,
            payload,
        };

        if latency > Duration::ZERO {
            stats.messages_delayed.fetch_add(1, Ordering::Relaxed);
            // Delivered in the background so a slow link does not hold a send worker.
            let inner = self.inner.clone();
            let to = to.to_string();
            tokio::spawn(async move {
                Delay::new(latency).await;
                if tx.send(inbound).await.is_err() {
                    tracing::trace!("delayed envelope to {} lost: receiver closed", to);
                    inner.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                }
            });
            return Ok(());
        }

        if tx.send(inbound).await.is_err() {
            stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            return Err(MemoryNetworkError::Closed(to.to_string()));
        }
        Ok(())
    }
}

/// A node's outbound side on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    addr: String,
    network: MemoryNetwork,
}

impl MemoryPeer {
    /// Address this peer is registered under.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Network this peer belongs to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl fmt::Display for MemoryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr)
    }
}

impl Peer for MemoryPeer {
    type Error = MemoryNetworkError;

    async fn send(&self, payload: Bytes, route: Route, destination: &str) -> Result<(), Self::Error> {
        self.network
            .deliver(&self.addr, destination, route, payload)
            .await
    }
}

/// Feed inbound envelopes into `node` until the node stops or the
/// receiver closes.
pub async fn serve<P: Peer>(node: Bmmc<P>, inbound: async_channel::Receiver<Inbound>) {
    while let Ok(envelope) = inbound.recv().await {
        if node.is_shutdown() {
            break;
        }
        node.handle(envelope.route, &envelope.payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chaos_config_defaults() {
        let config = ChaosConfig::default();
        assert!(!config.enabled);
        assert!(!config.should_drop());
        assert_eq!(config.get_latency(), Duration::ZERO);
    }

    #[test]
    fn test_chaos_full_loss() {
        let config = ChaosConfig::new().with_message_loss_rate(1.0);
        assert!((0..100).all(|_| config.should_drop()));

        let config = ChaosConfig::new().with_message_loss_rate(7.0);
        assert_eq!(config.message_loss_rate, 1.0);
    }

    #[test]
    fn test_latency_bounds() {
        let config = ChaosConfig::new()
            .with_latency(Duration::from_millis(5))
            .with_jitter(Duration::from_millis(10));
        for _ in 0..100 {
            let latency = config.get_latency();
            assert!(latency >= Duration::from_millis(5));
            assert!(latency <= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_partition() {
        let partition = NetworkPartition::new();
        assert!(!partition.is_partitioned("a", "b"));

        partition.isolate("a", ["b", "c"]);
        assert!(partition.is_partitioned("a", "b"));
        assert!(partition.is_partitioned("c", "a"));
        assert!(!partition.is_partitioned("b", "c"));

        partition.heal_all();
        assert!(!partition.is_partitioned("a", "b"));
    }

    #[tokio::test]
    async fn test_memory_network_delivery() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.register("a");
        let (_b, b_rx) = network.register("b");

        a.send(Bytes::from("hi"), Route::Gossip, "b").await.unwrap();
        let inbound = b_rx.recv().await.unwrap();
        assert_eq!(inbound.from, "a");
        assert_eq!(inbound.route, Route::Gossip);
        assert_eq!(inbound.payload, Bytes::from("hi"));

        let err = a
            .send(Bytes::from("hi"), Route::Gossip, "nobody")
            .await
            .unwrap_err();
        assert_eq!(err, MemoryNetworkError::UnknownPeer("nobody".into()));
    }

    #[tokio::test]
    async fn test_memory_network_loss_and_partition() {
        let network = MemoryNetwork::with_chaos(ChaosConfig::new().with_message_loss_rate(1.0));
        let (a, _a_rx) = network.register("a");
        let (_b, b_rx) = network.register("b");

        a.send(Bytes::from("lost"), Route::Gossip, "b").await.unwrap();
        assert!(b_rx.is_empty());

        network.set_chaos(ChaosConfig::default());
        network.partition().partition("a", "b");
        a.send(Bytes::from("blocked"), Route::Gossip, "b").await.unwrap();
        assert!(b_rx.is_empty());

        let stats = network.stats();
        assert_eq!(stats.messages_total, 2);
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.messages_partitioned, 1);
        assert_eq!(stats.delivery_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_delayed_delivery_to_closed_node_counts_as_dropped() {
        let network =
            MemoryNetwork::with_chaos(ChaosConfig::new().with_latency(Duration::from_millis(20)));
        let (a, _a_rx) = network.register("a");
        let (_b, _b_rx) = network.register("b");

        a.send(Bytes::from("late"), Route::Gossip, "b").await.unwrap();
        assert!(network.unregister("b"));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while network.stats().messages_dropped == 0 {
            assert!(tokio::time::Instant::now() < deadline, "loss never counted");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = network.stats();
        assert_eq!(stats.messages_total, 1);
        assert_eq!(stats.messages_delayed, 1);
        assert_eq!(stats.messages_dropped, 1);
        assert_eq!(stats.delivery_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_unregister() {
        let network = MemoryNetwork::new();
        let (a, _a_rx) = network.register("a");
        let (_b, b_rx) = network.register("b");

        assert!(network.unregister("b"));
        assert!(!network.unregister("b"));
        assert!(b_rx.recv().await.is_err());
        assert!(a.send(Bytes::from("x"), Route::Gossip, "b").await.is_err());
        assert_eq!(network.addresses(), vec!["a".to_string()]);
    }
}
