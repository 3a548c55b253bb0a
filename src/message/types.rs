//! Wire envelopes for the three-phase BMMC conversation.
//!
//! One round-trip between two nodes looks like:
//!
//! ```text
//!  A (gossiper)                         B (receiver)
//!      │ ── Gossip {host: A, round, digest} ──▶ │  diff digest
//!      │ ◀── Solicitation {host: B, missing} ── │
//!      │ ── Synchronization {host: A, elems} ─▶ │  insert + callbacks
//! ```
//!
//! Envelopes are JSON objects with stable camelCase field names so that
//! nodes built on other stacks can join the same group.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::Element;
use crate::error::{Error, Result};
use crate::round::RoundNumber;

/// Digest advertisement sent by the gossiper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gossip {
    /// Sender's peer string; solicitations are sent back to it.
    pub host: String,
    /// Sender's round when the envelope was built.
    pub round_number: RoundNumber,
    /// Ids of the sender's buffered elements, newest first.
    pub digest: Vec<String>,
}

/// Request for the elements a receiver is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Solicitation {
    /// Requester's peer string; the synchronization is sent back to it.
    pub host: String,
    /// Round copied from the gossip that triggered this request.
    pub round_number: RoundNumber,
    /// Ids being requested.
    pub digest: Vec<String>,
}

/// Full elements answering a solicitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synchronization {
    /// Responder's peer string.
    pub host: String,
    /// Requested elements that the responder still buffers.
    pub elements: Vec<Element>,
}

/// Common encode/decode for the JSON envelopes.
pub trait Envelope: Serialize + DeserializeOwned {
    /// Envelope name used in logs and error messages.
    const NAME: &'static str;

    /// Encode into a JSON byte payload.
    fn encode(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::Encode(format!("{}: {}", Self::NAME, e)))
    }

    /// Decode from a JSON byte payload.
    fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::Decode(format!("{}: {}", Self::NAME, e)))
    }
}

impl Envelope for Gossip {
    const NAME: &'static str = "gossip";
}

impl Envelope for Solicitation {
    const NAME: &'static str = "solicitation";
}

impl Envelope for Synchronization {
    const NAME: &'static str = "synchronization";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::NO_CALLBACK;
    use serde_json::{json, Value};

    #[test]
    fn test_gossip_wire_format() {
        let gossip = Gossip {
            host: "127.0.0.1:7000".to_string(),
            round_number: RoundNumber::new(12),
            digest: vec!["a".to_string(), "b".to_string()],
        };
        let value: Value = serde_json::from_slice(&gossip.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "host": "127.0.0.1:7000",
                "roundNumber": {"number": 12},
                "digest": ["a", "b"],
            })
        );
    }

    #[test]
    fn test_solicitation_decode() {
        let raw = br#"{"host":"n2","roundNumber":{"number":3},"digest":["x"]}"#;
        let solicitation = Solicitation::decode(raw).unwrap();
        assert_eq!(solicitation.host, "n2");
        assert_eq!(solicitation.round_number.number, 3);
        assert_eq!(solicitation.digest, vec!["x".to_string()]);
    }

    #[test]
    fn test_synchronization_carries_elements() {
        let el = Element::new(json!({"k": "v"}), NO_CALLBACK);
        let sync = Synchronization {
            host: "n1".to_string(),
            elements: vec![el.clone()],
        };
        let decoded = Synchronization::decode(&sync.encode().unwrap()).unwrap();
        assert_eq!(decoded.elements, vec![el]);
    }

    #[test]
    fn test_decode_garbage() {
        let err = Gossip::decode(b"not json").unwrap_err();
        assert!(matches!(err, Error::Decode(ref msg) if msg.starts_with("gossip")));

        // Valid JSON of the wrong shape is also a decode error.
        assert!(Synchronization::decode(br#"{"host": 5}"#).is_err());
    }
}
