//! Peer abstraction for BMMC message delivery.
//!
//! The engine never opens sockets itself. Every node is configured with a
//! host value implementing [`Peer`]: its `Display` output is the node's
//! identity on the wire, and its [`Peer::send`] delivers an encoded envelope
//! to another node addressed by that node's identity string.
//!
//! # Available Peers
//!
//! - [`ChannelPeer`]: Channel-based peer for testing or external delivery
//! - [`NoopPeer`]: Peer that discards every message
//! - [`MemoryPeer`](crate::testing::MemoryPeer): In-memory network with
//!   loss and latency injection

use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Named route an envelope is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Digest advertisement.
    Gossip,
    /// Request for missing elements.
    Solicitation,
    /// Missing elements.
    Synchronization,
}

impl Route {
    /// All routes, in conversation order.
    pub const ALL: [Route; 3] = [Route::Gossip, Route::Solicitation, Route::Synchronization];

    /// Path form of the route, e.g. `"/gossip"`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Route::Gossip => "/gossip",
            Route::Solicitation => "/solicitation",
            Route::Synchronization => "/synchronization",
        }
    }

    /// Parse a path such as `"/gossip"`.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == path)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = UnknownRoute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_path(s).ok_or_else(|| UnknownRoute(s.to_string()))
    }
}

/// Error returned when parsing an unknown route path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route: {0}")]
pub struct UnknownRoute(pub String);

/// A node's identity and its outbound transport.
///
/// The `Display` output must be stable: it is used as the peer-buffer key
/// and as the destination other nodes send to.
///
/// # Example
///
/// ```ignore
/// use bimodal_multicast::{Peer, Route};
///
/// struct HttpPeer {
///     addr: String,
///     client: reqwest::Client,
/// }
///
/// impl std::fmt::Display for HttpPeer {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str(&self.addr)
///     }
/// }
///
/// impl Peer for HttpPeer {
///     type Error = reqwest::Error;
///
///     async fn send(&self, payload: Bytes, route: Route, destination: &str) -> Result<(), Self::Error> {
///         let url = format!("http://{}{}", destination, route);
///         self.client.post(url).body(payload).send().await?;
///         Ok(())
///     }
/// }
/// ```
#[auto_impl::auto_impl(Box, Arc)]
pub trait Peer: fmt::Display + Send + Sync + 'static {
    /// Error type for send operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Deliver `payload` to `destination` on `route`.
    fn send(
        &self,
        payload: Bytes,
        route: Route,
        destination: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Outbound envelope captured by a [`ChannelPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination peer string.
    pub destination: String,
    /// Route the envelope was sent on.
    pub route: Route,
    /// Encoded envelope.
    pub payload: Bytes,
}

/// A peer that pushes every send into a channel.
///
/// Useful for tests or when delivery is handled externally.
#[derive(Debug, Clone)]
pub struct ChannelPeer {
    name: String,
    tx: async_channel::Sender<Outbound>,
}

impl ChannelPeer {
    /// Create a channel peer named `name` that forwards into `tx`.
    pub fn new(name: impl Into<String>, tx: async_channel::Sender<Outbound>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// Create a channel peer with a new bounded channel.
    ///
    /// Returns the peer and the receiver for captured sends.
    pub fn bounded(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, async_channel::Receiver<Outbound>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self::new(name, tx), rx)
    }
}

impl fmt::Display for ChannelPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Error type for [`ChannelPeer`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("channel peer error: {0}")]
pub struct ChannelPeerError(pub String);

impl Peer for ChannelPeer {
    type Error = ChannelPeerError;

    async fn send(&self, payload: Bytes, route: Route, destination: &str) -> Result<(), Self::Error> {
        self.tx
            .send(Outbound {
                destination: destination.to_string(),
                route,
                payload,
            })
            .await
            .map_err(|e| ChannelPeerError(e.to_string()))
    }
}

/// A peer that discards all messages.
#[derive(Debug, Clone)]
pub struct NoopPeer {
    name: String,
}

impl NoopPeer {
    /// Create a no-op peer named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for NoopPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Peer for NoopPeer {
    type Error = std::convert::Infallible;

    async fn send(&self, _payload: Bytes, _route: Route, _destination: &str) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_route_paths() {
        for route in Route::ALL {
            assert_eq!(Route::from_path(route.as_str()), Some(route));
            assert_eq!(route.to_string().parse::<Route>().unwrap(), route);
        }
        assert!(Route::from_path("/unknown").is_none());
        assert!("gossip".parse::<Route>().is_err());
    }

    #[tokio::test]
    async fn test_channel_peer() {
        let (peer, rx) = ChannelPeer::bounded("node-1", 16);
        assert_eq!(peer.to_string(), "node-1");

        peer.send(Bytes::from("hello"), Route::Gossip, "node-2")
            .await
            .unwrap();

        let out = rx.recv().await.unwrap();
        assert_eq!(out.destination, "node-2");
        assert_eq!(out.route, Route::Gossip);
        assert_eq!(out.payload, Bytes::from("hello"));
    }

    #[tokio::test]
    async fn test_channel_peer_closed() {
        let (peer, rx) = ChannelPeer::bounded("node-1", 1);
        drop(rx);
        assert!(peer
            .send(Bytes::from("x"), Route::Solicitation, "node-2")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_noop_peer_through_arc() {
        let peer = Arc::new(NoopPeer::new("quiet"));
        assert_eq!(peer.to_string(), "quiet");
        peer.send(Bytes::from("x"), Route::Synchronization, "anyone")
            .await
            .unwrap();
    }
}
