//! # bimodal-multicast
//!
//! Bimodal Multicast (BMMC): probabilistic, epidemic-style reliable broadcast
//! for a dynamic group of peers.
//!
//! Every node keeps a bounded buffer of messages. Each round it advertises a
//! digest of that buffer to a few random peers; receivers detect gaps,
//! solicit the missing payloads and synchronize. With high probability every
//! message reaches every node, without any node tracking who has seen what.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Application                               │
//! │      add_message / add_peer / remove_peer / get_messages         │
//! └────────────────────────────┬────────────────────────────────────┘
//!                              │ callbacks on delivery
//! ┌────────────────────────────▼────────────────────────────────────┐
//! │                          Bmmc                                    │
//! │     gossiper task · send workers · gossip/solicit/sync handlers  │
//! ├──────────────┬──────────────┬──────────────┬────────────────────┤
//! │ MessageBuffer│  PeerBuffer  │ GossipRound  │  CallbackRegistry  │
//! │ (ts-ordered) │  (sampling)  │  (wrapping)  │ (+ add/remove-peer)│
//! └──────────────┴──────────────┴──────────────┴────────────────────┘
//!                              │ Peer::send(bytes, route, destination)
//!                    ┌─────────▼─────────┐
//!                    │ your transport    │
//!                    └───────────────────┘
//! ```
//!
//! ## The Three-Phase Exchange
//!
//! - **Gossip**: every round, a node sends `{host, round, digest}` to
//!   `floor(beta * peers) + 1` random peers
//! - **Solicitation**: a receiver missing some advertised ids asks the
//!   gossiper for them
//! - **Synchronization**: the gossiper answers with the full elements, which
//!   the receiver buffers and hands to callbacks
//!
//! Peer membership rides on the same mechanism: `add_peer` and
//! `remove_peer` buffer internal elements whose built-in callbacks update
//! the peer buffer of every node they reach.
//!
//! ## Example
//!
//! ```ignore
//! use bimodal_multicast::{Bmmc, CallbackError, Config, Element};
//!
//! let config = Config::new(my_peer, 1024).with_callback(
//!     "chat",
//!     |el: &Element| -> Result<(), CallbackError> {
//!         println!("chat: {}", el.msg);
//!         Ok(())
//!     },
//! );
//!
//! let node = Bmmc::new(config)?;
//! node.start()?;
//! node.add_peer("10.0.0.2:7000")?;
//! node.add_message(serde_json::json!("hello"), "chat")?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

mod bmmc;
mod callback;
mod config;
mod error;
mod message;
mod peer_buffer;
mod round;
mod transport;

pub mod testing;

#[cfg(feature = "metrics")]
#[cfg_attr(docsrs, doc(cfg(feature = "metrics")))]
pub mod metrics;

// Re-export the protocol engine
pub use bmmc::{compute_fanout, Bmmc, BmmcStats};

// Re-export callback types
pub use callback::{
    BuiltinCallback, Callback, CallbackError, CallbackRegistry, ADD_PEER, REMOVE_PEER,
};

// Re-export config types
pub use config::{
    Config, DEFAULT_BETA, DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_OUTGOING_QUEUE_SIZE,
    DEFAULT_ROUND_DURATION, DEFAULT_SEND_TIMEOUT,
};

// Re-export error types
pub use error::{Error, ErrorKind, Result};

// Re-export message types
pub use message::{Element, Envelope, Gossip, MessageBuffer, Solicitation, Synchronization, NO_CALLBACK};

// Re-export peer buffer types
pub use peer_buffer::{PeerBuffer, MAX_PEERS};

// Re-export round types
pub use round::{GossipRound, RoundNumber, MAX_ROUND_NUMBER};

// Re-export transport types
pub use transport::{ChannelPeer, ChannelPeerError, NoopPeer, Outbound, Peer, Route, UnknownRoute};
