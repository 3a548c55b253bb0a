//! Message types and buffers for the BMMC protocol.
//!
//! This module contains:
//! - [`Element`] - Buffer entries with content-derived ids
//! - [`MessageBuffer`] - Bounded, timestamp-ordered element buffer
//! - [`Gossip`], [`Solicitation`], [`Synchronization`] - Wire envelopes

mod buffer;
mod element;
mod types;

pub use buffer::MessageBuffer;
pub use element::{Element, NO_CALLBACK};
pub use types::{Envelope, Gossip, Solicitation, Synchronization};
