//! Fuzz target for PeerBuffer operations.
//!
//! Random operation sequences are mirrored against a plain `HashSet` model.

#![no_main]

use arbitrary::Arbitrary;
use bimodal_multicast::PeerBuffer;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

#[derive(Debug, Arbitrary)]
enum PeerOp {
    Add { id: u8 },
    Remove { id: u8 },
    Contains { id: u8 },
    RandomPeer,
    RandomPeers { count: u8 },
}

fuzz_target!(|ops: Vec<PeerOp>| {
    let buffer = PeerBuffer::new();
    let mut model: HashSet<String> = HashSet::new();

    for op in ops {
        match op {
            PeerOp::Add { id } => {
                let peer = format!("peer-{}", id);
                assert_eq!(buffer.add(peer.clone()), model.insert(peer));
            }
            PeerOp::Remove { id } => {
                let peer = format!("peer-{}", id);
                assert_eq!(buffer.remove(&peer), model.remove(&peer));
            }
            PeerOp::Contains { id } => {
                let peer = format!("peer-{}", id);
                assert_eq!(buffer.contains(&peer), model.contains(&peer));
            }
            PeerOp::RandomPeer => match buffer.random_peer() {
                Some(peer) => assert!(model.contains(&peer)),
                None => assert!(model.is_empty()),
            },
            PeerOp::RandomPeers { count } => {
                let sample = buffer.random_peers(count as usize);
                assert_eq!(sample.len(), (count as usize).min(model.len()));
                let distinct: HashSet<_> = sample.iter().collect();
                assert_eq!(distinct.len(), sample.len());
                assert!(sample.iter().all(|p| model.contains(p)));
            }
        }
        assert_eq!(buffer.len(), model.len());
    }
});
