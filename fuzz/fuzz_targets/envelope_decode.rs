//! Fuzz target for envelope decoding and the inbound handlers.
//!
//! Arbitrary bytes must never panic the decoders, and feeding them to a
//! node on every route must leave its buffers consistent.

#![no_main]

use bimodal_multicast::{
    Bmmc, Config, Envelope, Gossip, NoopPeer, Route, Solicitation, Synchronization,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Gossip::decode(data);
    let _ = Solicitation::decode(data);

    if let Ok(sync) = Synchronization::decode(data) {
        // Whatever decodes must encode again.
        let encoded = sync.encode().expect("decoded synchronization re-encodes");
        let again = Synchronization::decode(&encoded).expect("re-encoded synchronization decodes");
        assert_eq!(again.elements.len(), sync.elements.len());
    }

    let node = Bmmc::new(Config::new(NoopPeer::new("fuzz"), 8)).expect("valid config");
    for route in Route::ALL {
        node.handle(route, data);
    }

    let stats = node.stats();
    assert!(stats.buffered <= 8);
    assert!(!node.get_peers().iter().any(|p| p == "fuzz"));
});
