//! Fuzz target for MessageBuffer insertion.
//!
//! Inserts elements with fuzzer-chosen timestamps and checks the ordering,
//! capacity and uniqueness invariants after every operation.

#![no_main]

use arbitrary::Arbitrary;
use bimodal_multicast::{Element, MessageBuffer, NO_CALLBACK};
use chrono::DateTime;
use libfuzzer_sys::fuzz_target;
use std::collections::HashSet;

#[derive(Debug, Arbitrary)]
struct Input {
    capacity: u8,
    inserts: Vec<(u8, u32)>,
}

fuzz_target!(|input: Input| {
    let capacity = (input.capacity as usize % 16) + 1;
    let buffer = MessageBuffer::new(capacity);

    for (id, secs) in input.inserts {
        let element = Element {
            id: format!("m{}", id),
            timestamp: DateTime::from_timestamp(secs as i64, 0).expect("in range"),
            msg: serde_json::Value::from(id),
            callback_type: NO_CALLBACK.to_string(),
            gossip_count: 0,
            internal: false,
        };
        let _ = buffer.add(element);

        let elements = buffer.elements();
        assert!(elements.len() <= capacity);
        let ids: HashSet<_> = elements.iter().map(|e| &e.id).collect();
        assert_eq!(ids.len(), elements.len());
        for pair in elements.windows(2) {
            assert!(pair[0].timestamp > pair[1].timestamp);
        }
        assert_eq!(buffer.elements_by_ids(&buffer.digest()), elements);
    }
});
