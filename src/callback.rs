//! Delivery callbacks.
//!
//! Every element carries a callback type. When an element is delivered
//! (inserted locally by the API or received through a synchronization),
//! the engine looks the type up and runs:
//!
//! - the built-in handler, for the reserved [`ADD_PEER`] / [`REMOVE_PEER`]
//!   types, which keeps peer membership converging across the group;
//! - the user callback registered under that type, if any.
//!
//! Callbacks run inside the node's tracing span, so anything they log is
//! attributed to the node that delivered the element.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::error::{Error, Result};
use crate::message::Element;
use crate::peer_buffer::PeerBuffer;

/// Callback type of internal elements announcing a new peer.
pub const ADD_PEER: &str = "add-peer";

/// Callback type of internal elements announcing a removed peer.
pub const REMOVE_PEER: &str = "remove-peer";

/// Error returned by a callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// A function run when an element of a given callback type is delivered.
///
/// Implemented for every `Fn(&Element) -> Result<(), CallbackError>`.
///
/// **Important**: callbacks run synchronously on the delivering task
/// (an inbound handler or an API caller). They must return quickly.
pub trait Callback: Send + Sync + 'static {
    /// Handle a delivered element.
    fn call(&self, element: &Element) -> std::result::Result<(), CallbackError>;
}

impl<F> Callback for F
where
    F: Fn(&Element) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
{
    fn call(&self, element: &Element) -> std::result::Result<(), CallbackError> {
        self(element)
    }
}

/// Map from callback type to user callback.
#[derive(Clone, Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<String, Arc<dyn Callback>>,
}

impl CallbackRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `callback_type` (builder pattern).
    pub fn with_callback(mut self, callback_type: impl Into<String>, callback: impl Callback) -> Self {
        self.insert(callback_type, callback);
        self
    }

    /// Register `callback` under `callback_type`, replacing any previous one.
    pub fn insert(&mut self, callback_type: impl Into<String>, callback: impl Callback) {
        self.callbacks
            .insert(callback_type.into(), Arc::new(callback));
    }

    /// Look up the callback registered for `callback_type`.
    pub fn get(&self, callback_type: &str) -> Option<&Arc<dyn Callback>> {
        self.callbacks.get(callback_type)
    }

    /// Check if a callback is registered for `callback_type`.
    pub fn contains(&self, callback_type: &str) -> bool {
        self.callbacks.contains_key(callback_type)
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Check if no callback is registered.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Registered callback types. Order is unspecified.
    pub fn callback_types(&self) -> impl Iterator<Item = &str> {
        self.callbacks.keys().map(String::as_str)
    }

    /// Reject user callbacks registered under a reserved type.
    pub fn validate(&self) -> Result<()> {
        for callback_type in self.callbacks.keys() {
            if BuiltinCallback::from_type(callback_type).is_some() {
                return Err(Error::NotAllowed(callback_type.clone()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.callbacks.keys()).finish()
    }
}

/// Protocol-owned callbacks for peer membership elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCallback {
    /// Insert the payload peer into the peer buffer.
    AddPeer,
    /// Remove the payload peer from the peer buffer.
    RemovePeer,
}

impl BuiltinCallback {
    /// Resolve a callback type to a built-in handler.
    pub fn from_type(callback_type: &str) -> Option<Self> {
        match callback_type {
            ADD_PEER => Some(Self::AddPeer),
            REMOVE_PEER => Some(Self::RemovePeer),
            _ => None,
        }
    }

    /// Callback type string of this handler.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AddPeer => ADD_PEER,
            Self::RemovePeer => REMOVE_PEER,
        }
    }

    /// Apply the membership change carried by `element`.
    ///
    /// `local_host` is never added to the peer buffer: a node does not
    /// gossip with itself.
    pub(crate) fn run(
        &self,
        element: &Element,
        peers: &PeerBuffer,
        local_host: &str,
    ) -> std::result::Result<(), CallbackError> {
        let peer = element
            .msg
            .as_str()
            .ok_or_else(|| format!("{} payload is not a peer string: {}", self.as_str(), element.msg))?;

        match self {
            Self::AddPeer => {
                if peer == local_host {
                    tracing::debug!("ignoring add-peer for local host {}", peer);
                } else if peers.add(peer) {
                    tracing::info!(peer, "peer added to the peer buffer");
                }
            }
            Self::RemovePeer => {
                if peers.remove(peer) {
                    tracing::info!(peer, "peer removed from the peer buffer");
                }
            }
        }
        Ok(())
    }
}
