//! Peer buffer: the set of peers a node gossips with.
//!
//! Peers are opaque strings produced by [`Peer`](crate::Peer)'s `Display`
//! implementation. The buffer keeps a hash set for membership checks and a
//! vector mirror of it for uniform random sampling.

use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashSet;

/// Advisory upper bound on the number of peers.
///
/// Not enforced by [`PeerBuffer`]; exported for transports that want to cap
/// their own connection tables.
pub const MAX_PEERS: usize = 4096;

/// Concurrent set of peer identifiers with uniform random sampling.
#[derive(Debug, Default)]
pub struct PeerBuffer {
    inner: RwLock<PeerBufferInner>,
}

#[derive(Debug, Default)]
struct PeerBufferInner {
    /// Membership index.
    set: HashSet<String>,
    /// Same peers as `set`, kept in sync on every mutation.
    vec: Vec<String>,
}

impl PeerBuffer {
    /// Create an empty peer buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer.
    ///
    /// Returns `true` if the peer was not present before.
    pub fn add(&self, peer: impl Into<String>) -> bool {
        let peer = peer.into();
        let mut inner = self.inner.write();
        if inner.set.contains(&peer) {
            return false;
        }
        inner.set.insert(peer.clone());
        inner.vec.push(peer);
        true
    }

    /// Remove a peer. Removing an unknown peer is a no-op.
    ///
    /// Returns `true` if the peer was present.
    pub fn remove(&self, peer: &str) -> bool {
        let mut inner = self.inner.write();
        if !inner.set.remove(peer) {
            return false;
        }
        if let Some(pos) = inner.vec.iter().position(|p| p == peer) {
            inner.vec.swap_remove(pos);
        }
        true
    }

    /// Check if a peer is present.
    pub fn contains(&self, peer: &str) -> bool {
        self.inner.read().set.contains(peer)
    }

    /// Number of peers.
    pub fn len(&self) -> usize {
        self.inner.read().vec.len()
    }

    /// Check if there are no peers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all peers. Order is unspecified.
    pub fn list(&self) -> Vec<String> {
        self.inner.read().vec.clone()
    }

    /// Pick one peer uniformly at random.
    pub fn random_peer(&self) -> Option<String> {
        let inner = self.inner.read();
        if inner.vec.is_empty() {
            return None;
        }
        let idx = rand::rng().random_range(0..inner.vec.len());
        Some(inner.vec[idx].clone())
    }

    /// Pick `count` distinct peers uniformly at random.
    ///
    /// The result is clamped to the number of known peers.
    pub fn random_peers(&self, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        let inner = self.inner.read();
        Self::reservoir_sample(&inner.vec, count)
    }

    /// Reservoir sampling: one pass over `items`, O(count) allocations.
    fn reservoir_sample(items: &[String], count: usize) -> Vec<String> {
        let effective_count = count.min(items.len());
        if effective_count == 0 {
            return Vec::new();
        }

        let mut rng = rand::rng();
        let mut reservoir: Vec<String> = Vec::with_capacity(effective_count);

        for (seen, item) in items.iter().enumerate() {
            if reservoir.len() < effective_count {
                reservoir.push(item.clone());
            } else {
                let j = rng.random_range(0..=seen);
                if j < effective_count {
                    reservoir[j] = item.clone();
                }
            }
        }

        reservoir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_returns_whether_new() {
        let peers = PeerBuffer::new();
        assert!(peers.add("node-1"));
        assert!(!peers.add("node-1"));
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let peers = PeerBuffer::new();
        peers.add("node-1");
        peers.add("node-2");
        assert!(peers.remove("node-1"));
        assert!(!peers.remove("node-1"));
        assert!(!peers.remove("unknown"));
        assert_eq!(peers.list(), vec!["node-2".to_string()]);
    }

    #[test]
    fn test_random_peer_empty() {
        let peers = PeerBuffer::new();
        assert!(peers.random_peer().is_none());
        assert!(peers.random_peers(3).is_empty());
    }

    #[test]
    fn test_random_peer_member() {
        let peers = PeerBuffer::new();
        for i in 0..5 {
            peers.add(format!("node-{}", i));
        }
        for _ in 0..50 {
            let p = peers.random_peer().unwrap();
            assert!(peers.contains(&p));
        }
    }

    #[test]
    fn test_random_peers_distinct() {
        let peers = PeerBuffer::new();
        for i in 0..10 {
            peers.add(format!("node-{}", i));
        }

        for _ in 0..50 {
            let sample = peers.random_peers(4);
            assert_eq!(sample.len(), 4);
            let unique: HashSet<_> = sample.iter().collect();
            assert_eq!(unique.len(), 4);
            assert!(sample.iter().all(|p| peers.contains(p)));
        }
    }

    #[test]
    fn test_random_peers_clamped() {
        let peers = PeerBuffer::new();
        peers.add("a");
        peers.add("b");
        let mut sample = peers.random_peers(10);
        sample.sort();
        assert_eq!(sample, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_random_peers_covers_all() {
        let peers = PeerBuffer::new();
        for i in 0..6 {
            peers.add(format!("node-{}", i));
        }
        let mut seen = HashSet::new();
        for _ in 0..500 {
            for p in peers.random_peers(2) {
                seen.insert(p);
            }
        }
        assert_eq!(seen.len(), 6);
    }
}
