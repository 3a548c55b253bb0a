//! Core BMMC protocol engine.
//!
//! A [`Bmmc`] node owns a bounded [`MessageBuffer`], a [`PeerBuffer`] and a
//! round counter. Once started, two kinds of background tasks run on the
//! ambient tokio runtime:
//!
//! - the **gossiper**, which every round advertises the buffer digest to
//!   `floor(beta * peers) + 1` random peers;
//! - a fixed pool of **send workers**, which drain the bounded outbound
//!   queue through the configured [`Peer`].
//!
//! Inbound envelopes are handed to the engine by the transport through
//! [`Bmmc::gossip_handler`], [`Bmmc::solicitation_handler`] and
//! [`Bmmc::synchronization_handler`] (or [`Bmmc::handle`]). Handlers never
//! block: replies are enqueued with `try_send` and dropped if the queue is
//! full.

use bytes::Bytes;
use futures::FutureExt;
use futures_timer::Delay;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tracing::Instrument;

use crate::callback::{BuiltinCallback, CallbackError, ADD_PEER, REMOVE_PEER};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Element, Envelope, Gossip, MessageBuffer, Solicitation, Synchronization};
use crate::peer_buffer::PeerBuffer;
use crate::round::GossipRound;
use crate::transport::{Outbound, Peer, Route};

#[cfg(feature = "metrics")]
use crate::metrics;

/// Number of peers a round gossips to.
///
/// Zero when there is nobody to talk to, nothing to advertise, or gossiping
/// is disabled (`beta == 0`). Otherwise `floor(beta * peers) + 1`, so a node
/// with at least one peer always reaches someone.
pub fn compute_fanout(beta: f64, peers: usize, buffered: usize) -> usize {
    if peers == 0 || buffered == 0 || beta <= 0.0 {
        return 0;
    }
    (beta * peers as f64).floor() as usize + 1
}

/// Bimodal Multicast node.
///
/// Cheap to clone: all clones share the same buffers and tasks.
///
/// # Example
///
/// ```ignore
/// use bimodal_multicast::{Bmmc, Config, NO_CALLBACK};
///
/// let node = Bmmc::new(Config::new(my_peer, 1024))?;
/// node.start()?;
/// node.add_peer("10.0.0.2:7000")?;
/// node.add_message(serde_json::json!("hello"), NO_CALLBACK)?;
///
/// // From the transport's inbound path:
/// node.handle(route, &body);
///
/// node.stop();
/// ```
pub struct Bmmc<P> {
    inner: Arc<BmmcInner<P>>,
}

struct BmmcInner<P> {
    /// Configuration, including the host peer.
    config: Config<P>,

    /// Cached `Display` output of the host peer.
    host: String,

    /// Buffered elements, newest first.
    messages: MessageBuffer,

    /// Known peers.
    peers: PeerBuffer,

    /// Current gossip round.
    round: GossipRound,

    /// Span every log line of this node is recorded in.
    span: tracing::Span,

    /// Set once `start` has spawned the background tasks.
    started: AtomicBool,

    /// Cleared when the gossiper task exits.
    gossiping: AtomicBool,

    /// Shutdown flag.
    shutdown: AtomicBool,

    #[cfg(test)]
    fail_next_round: AtomicBool,

    /// Shutdown notification channel; closing the sender wakes every task.
    shutdown_rx: async_channel::Receiver<()>,
    shutdown_tx: async_channel::Sender<()>,

    /// Outbound envelope queue drained by the send workers.
    outgoing_tx: async_channel::Sender<Outbound>,
    outgoing_rx: async_channel::Receiver<Outbound>,

    counters: Counters,
}

/// Point-in-time view of a node's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BmmcStats {
    /// Current gossip round.
    pub round: i64,
    /// Number of known peers.
    pub peers: usize,
    /// Number of buffered elements, internal ones included.
    pub buffered: usize,
    /// Gossip envelopes enqueued.
    pub gossips_sent: u64,
    /// Solicitation envelopes enqueued.
    pub solicitations_sent: u64,
    /// Synchronization envelopes enqueued.
    pub synchronizations_sent: u64,
    /// Elements inserted into the buffer, local and remote.
    pub elements_delivered: u64,
    /// Received elements that were already buffered.
    pub duplicates: u64,
    /// Received elements older than everything in a full buffer.
    pub too_old: u64,
    /// Callbacks that returned an error.
    pub callback_failures: u64,
    /// Sends that failed or timed out.
    pub send_failures: u64,
    /// Envelopes dropped because the outbound queue was full.
    pub outgoing_dropped: u64,
    /// Inbound envelopes that failed to decode.
    pub decode_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    gossips_sent: AtomicU64,
    solicitations_sent: AtomicU64,
    synchronizations_sent: AtomicU64,
    elements_delivered: AtomicU64,
    duplicates: AtomicU64,
    too_old: AtomicU64,
    callback_failures: AtomicU64,
    send_failures: AtomicU64,
    outgoing_dropped: AtomicU64,
    decode_failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn enqueued(&self, route: Route) {
        match route {
            Route::Gossip => {
                Self::bump(&self.gossips_sent);
                #[cfg(feature = "metrics")]
                metrics::record_gossip_sent();
            }
            Route::Solicitation => {
                Self::bump(&self.solicitations_sent);
                #[cfg(feature = "metrics")]
                metrics::record_solicitation_sent();
            }
            Route::Synchronization => {
                Self::bump(&self.synchronizations_sent);
                #[cfg(feature = "metrics")]
                metrics::record_synchronization_sent();
            }
        }
    }

    fn delivered(&self) {
        Self::bump(&self.elements_delivered);
        #[cfg(feature = "metrics")]
        metrics::record_delivery();
    }

    fn rejected(&self, err: &Error) {
        match err {
            Error::AlreadyExists { .. } => {
                Self::bump(&self.duplicates);
                #[cfg(feature = "metrics")]
                metrics::record_duplicate();
            }
            Error::TooOld { .. } => {
                Self::bump(&self.too_old);
                #[cfg(feature = "metrics")]
                metrics::record_too_old();
            }
            _ => {}
        }
    }

    fn callback_failed(&self) {
        Self::bump(&self.callback_failures);
        #[cfg(feature = "metrics")]
        metrics::record_callback_failure();
    }

    fn send_failed(&self) {
        Self::bump(&self.send_failures);
        #[cfg(feature = "metrics")]
        metrics::record_send_failure();
    }

    fn dropped(&self) {
        Self::bump(&self.outgoing_dropped);
        #[cfg(feature = "metrics")]
        metrics::record_outgoing_dropped();
    }

    fn decode_failed(&self) {
        Self::bump(&self.decode_failures);
        #[cfg(feature = "metrics")]
        metrics::record_decode_failure();
    }
}

impl<P: Peer> Bmmc<P> {
    /// Create a node from a configuration.
    ///
    /// Nothing runs until [`start`](Self::start) is called, but the node
    /// already accepts messages, peers and inbound envelopes.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the configuration is invalid.
    pub fn new(config: Config<P>) -> Result<Self> {
        config.validate()?;

        let host = config.host.to_string();
        if host.is_empty() {
            return Err(Error::Config("host identifier must not be empty".into()));
        }

        let (shutdown_tx, shutdown_rx) = async_channel::bounded(1);
        let (outgoing_tx, outgoing_rx) = async_channel::bounded(config.outgoing_queue_size);
        let span = tracing::info_span!("bmmc", host = %host);

        let inner = Arc::new(BmmcInner {
            messages: MessageBuffer::new(config.buffer_size),
            peers: PeerBuffer::new(),
            round: GossipRound::new(),
            span,
            started: AtomicBool::new(false),
            gossiping: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            #[cfg(test)]
            fail_next_round: AtomicBool::new(false),
            shutdown_rx,
            shutdown_tx,
            outgoing_tx,
            outgoing_rx,
            counters: Counters::default(),
            host,
            config,
        });

        Ok(Self { inner })
    }

    /// Spawn the gossiper and the send workers on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Shutdown`] if the node was stopped.
    /// - [`Error::AlreadyStarted`] on a second call.
    /// - [`Error::Config`] if called outside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("no tokio runtime available: {}", e)))?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyStarted);
        }

        for worker in 0..self.inner.config.max_concurrent_sends {
            let this = self.clone();
            runtime.spawn(
                async move { this.run_send_worker(worker).await }.instrument(self.inner.span.clone()),
            );
        }

        self.inner.gossiping.store(true, Ordering::Release);
        let this = self.clone();
        runtime.spawn(async move { this.run_gossiper().await }.instrument(self.inner.span.clone()));

        let _enter = self.inner.span.enter();
        tracing::info!(
            beta = self.inner.config.beta,
            round_duration = ?self.inner.config.round_duration,
            buffer_size = self.inner.config.buffer_size,
            "bmmc node started"
        );
        Ok(())
    }

    /// Stop the node.
    ///
    /// Wakes the gossiper and closes the outbound queue. Envelopes still
    /// queued are dropped. Idempotent.
    pub fn stop(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown_tx.close();
        self.inner.outgoing_tx.close();

        let _enter = self.inner.span.enter();
        tracing::info!(round = self.inner.round.get(), "bmmc node stopped");
    }

    /// Check if the gossiper is running.
    ///
    /// False before `start`, after `stop`, and after the gossiper died.
    pub fn is_running(&self) -> bool {
        self.inner.gossiping.load(Ordering::Acquire) && !self.is_shutdown()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Add a user message and run its callback locally.
    ///
    /// Returns the id of the new element.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyExists`] or [`Error::TooOld`] if the buffer rejects
    /// the element.
    pub fn add_message(&self, msg: Value, callback_type: &str) -> Result<String> {
        self.insert_local(Element::new(msg, callback_type))
    }

    /// Serialize `msg` to JSON and add it as a user message.
    pub fn add_typed_message<T: Serialize>(&self, msg: &T, callback_type: &str) -> Result<String> {
        let value = serde_json::to_value(msg).map_err(|e| Error::Encode(e.to_string()))?;
        self.add_message(value, callback_type)
    }

    /// Payloads of buffered user messages, newest first.
    pub fn get_messages(&self) -> Vec<Value> {
        self.inner.messages.messages(false)
    }

    /// Buffered user messages deserialized as `T`, newest first.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] if any payload does not deserialize as `T`.
    pub fn typed_messages<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.get_messages()
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(|e| Error::Decode(e.to_string())))
            .collect()
    }

    /// Add a peer and announce it to the group.
    ///
    /// Returns `true` if the peer was not known yet. The announcement is
    /// buffered and gossiped even when the peer was already known, so late
    /// joiners learn about it too.
    ///
    /// # Errors
    ///
    /// Propagates buffer rejections of the announcement element.
    pub fn add_peer(&self, peer: impl Into<String>) -> Result<bool> {
        let peer = peer.into();
        let added = peer != self.inner.host && self.inner.peers.add(peer.clone());
        self.insert_local(Element::new_internal(Value::String(peer), ADD_PEER))?;
        Ok(added)
    }

    /// Remove a peer and announce the removal to the group.
    pub fn remove_peer(&self, peer: impl Into<String>) -> Result<()> {
        let peer = peer.into();
        self.inner.peers.remove(&peer);
        self.insert_local(Element::new_internal(Value::String(peer), REMOVE_PEER))?;
        Ok(())
    }

    /// Known peers. Order is unspecified.
    pub fn get_peers(&self) -> Vec<String> {
        self.inner.peers.list()
    }

    /// This node's identifier.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Node configuration.
    pub fn config(&self) -> &Config<P> {
        &self.inner.config
    }

    /// Current gossip round.
    pub fn round(&self) -> i64 {
        self.inner.round.get()
    }

    /// Snapshot of this node's counters.
    pub fn stats(&self) -> BmmcStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        BmmcStats {
            round: self.inner.round.get(),
            peers: self.inner.peers.len(),
            buffered: self.inner.messages.len(),
            gossips_sent: load(&c.gossips_sent),
            solicitations_sent: load(&c.solicitations_sent),
            synchronizations_sent: load(&c.synchronizations_sent),
            elements_delivered: load(&c.elements_delivered),
            duplicates: load(&c.duplicates),
            too_old: load(&c.too_old),
            callback_failures: load(&c.callback_failures),
            send_failures: load(&c.send_failures),
            outgoing_dropped: load(&c.outgoing_dropped),
            decode_failures: load(&c.decode_failures),
        }
    }

    /// Dispatch an inbound envelope to the handler for `route`.
    pub fn handle(&self, route: Route, data: &[u8]) {
        match route {
            Route::Gossip => self.gossip_handler(data),
            Route::Solicitation => self.solicitation_handler(data),
            Route::Synchronization => self.synchronization_handler(data),
        }
    }

    /// Handle a gossip: solicit every advertised id not buffered locally.
    pub fn gossip_handler(&self, data: &[u8]) {
        let _enter = self.inner.span.enter();
        let Some(gossip) = self.decode::<Gossip>(data) else {
            return;
        };

        let missing = self.inner.messages.missing(&gossip.digest);
        if missing.is_empty() {
            return;
        }

        tracing::debug!(
            from = %gossip.host,
            round = gossip.round_number.number,
            missing = missing.len(),
            "soliciting missing elements"
        );

        let solicitation = Solicitation {
            host: self.inner.host.clone(),
            round_number: gossip.round_number,
            digest: missing,
        };
        self.send_envelope(gossip.host, Route::Solicitation, &solicitation);
    }

    /// Handle a solicitation: reply with the requested elements still buffered.
    pub fn solicitation_handler(&self, data: &[u8]) {
        let _enter = self.inner.span.enter();
        let Some(solicitation) = self.decode::<Solicitation>(data) else {
            return;
        };

        let elements = self.inner.messages.elements_by_ids(&solicitation.digest);
        tracing::debug!(
            from = %solicitation.host,
            requested = solicitation.digest.len(),
            found = elements.len(),
            "answering solicitation"
        );

        let synchronization = Synchronization {
            host: self.inner.host.clone(),
            elements,
        };
        self.send_envelope(solicitation.host, Route::Synchronization, &synchronization);
    }

    /// Handle a synchronization: insert each element and run its callbacks.
    pub fn synchronization_handler(&self, data: &[u8]) {
        let _enter = self.inner.span.enter();
        let Some(synchronization) = self.decode::<Synchronization>(data) else {
            return;
        };

        // Elements are applied in timestamp order, oldest first.
        let mut elements = synchronization.elements;
        elements.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        for mut element in elements {
            element.gossip_count = 0;
            match self.inner.messages.add(element.clone()) {
                Ok(()) => {
                    tracing::debug!(id = %element.id, from = %synchronization.host, "element received");
                    self.inner.counters.delivered();
                    self.run_callbacks(&element);
                }
                Err(e) => {
                    tracing::debug!("skipping element from {}: {}", synchronization.host, e);
                    self.inner.counters.rejected(&e);
                }
            }
        }
    }

    fn decode<E: Envelope>(&self, data: &[u8]) -> Option<E> {
        match E::decode(data) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!("dropping malformed {} envelope: {}", E::NAME, e);
                self.inner.counters.decode_failed();
                None
            }
        }
    }

    fn insert_local(&self, element: Element) -> Result<String> {
        let _enter = self.inner.span.enter();
        let id = element.id.clone();
        self.inner.messages.add(element.clone())?;
        self.inner.counters.delivered();
        tracing::debug!(id = %id, callback = %element.callback_type, "element added");
        self.run_callbacks(&element);
        Ok(id)
    }

    fn run_callbacks(&self, element: &Element) {
        if !element.has_callback() {
            return;
        }

        if let Some(builtin) = BuiltinCallback::from_type(&element.callback_type) {
            if let Err(e) = builtin.run(element, &self.inner.peers, &self.inner.host) {
                self.callback_failed(element, e);
            }
        }

        if let Some(callback) = self.inner.config.callbacks.get(&element.callback_type) {
            if let Err(e) = callback.call(element) {
                self.callback_failed(element, e);
            }
        }
    }

    fn callback_failed(&self, element: &Element, err: CallbackError) {
        let err = Error::Callback {
            callback_type: element.callback_type.clone(),
            reason: err.to_string(),
        };
        tracing::warn!(id = %element.id, "{}", err);
        self.inner.counters.callback_failed();
    }

    /// Encode and enqueue an envelope. Never blocks.
    fn send_envelope<E: Envelope>(&self, destination: String, route: Route, envelope: &E) -> bool {
        match envelope.encode() {
            Ok(payload) => self.enqueue(destination, route, payload),
            Err(e) => {
                tracing::warn!("failed to encode {} for {}: {}", E::NAME, destination, e);
                false
            }
        }
    }

    fn enqueue(&self, destination: String, route: Route, payload: Bytes) -> bool {
        match self.inner.outgoing_tx.try_send(Outbound {
            destination,
            route,
            payload,
        }) {
            Ok(()) => {
                self.inner.counters.enqueued(route);
                true
            }
            Err(async_channel::TrySendError::Full(out)) => {
                tracing::debug!("{} to {} dropped: outgoing queue full", route, out.destination);
                self.inner.counters.dropped();
                false
            }
            Err(async_channel::TrySendError::Closed(out)) => {
                tracing::debug!("{} to {} dropped: outgoing queue closed", route, out.destination);
                false
            }
        }
    }

    /// One gossip round. Returns the number of gossips enqueued.
    fn gossip_round(&self) -> usize {
        #[cfg(test)]
        if self.inner.fail_next_round.swap(false, Ordering::AcqRel) {
            panic!("injected round failure");
        }

        self.inner.round.increment();
        let round = self.inner.round.snapshot();

        let digest = self.inner.messages.digest();
        let fanout = compute_fanout(self.inner.config.beta, self.inner.peers.len(), digest.len());

        let mut sent = 0;
        if fanout > 0 {
            let targets = self.inner.peers.random_peers(fanout);
            tracing::debug!(
                round = round.number,
                fanout,
                digest = digest.len(),
                "gossip round"
            );

            let gossip = Gossip {
                host: self.inner.host.clone(),
                round_number: round,
                digest,
            };
            match gossip.encode() {
                Ok(payload) => {
                    for peer in targets {
                        if self.enqueue(peer, Route::Gossip, payload.clone()) {
                            sent += 1;
                        }
                    }
                }
                Err(e) => tracing::warn!("failed to encode gossip: {}", e),
            }
        }

        self.inner.messages.increment_gossip_count();

        #[cfg(feature = "metrics")]
        {
            metrics::set_round(round.number);
            metrics::set_peers(self.inner.peers.len());
            metrics::set_buffer_size(self.inner.messages.len());
        }

        sent
    }

    /// Run the gossiper until shutdown.
    ///
    /// A panic inside a round is logged and ends the gossiper; the rest of
    /// the node keeps serving inbound traffic.
    async fn run_gossiper(&self) {
        let round_duration = self.inner.config.round_duration;
        let mut interval = Delay::new(round_duration);

        loop {
            let shutdown_recv = self.inner.shutdown_rx.recv().fuse();
            futures::pin_mut!(shutdown_recv);

            futures::select! {
                _ = (&mut interval).fuse() => {
                    interval.reset(round_duration);
                }
                _ = shutdown_recv => {
                    break;
                }
            }

            if self.is_shutdown() {
                break;
            }

            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| self.gossip_round())) {
                tracing::error!("gossiper panicked, stopping rounds: {}", panic_message(&*panic));
                break;
            }
        }

        self.inner.gossiping.store(false, Ordering::Release);
        tracing::debug!("gossiper stopped");
    }

    /// Deliver queued envelopes through the host peer until shutdown.
    async fn run_send_worker(&self, worker: usize) {
        let timeout = self.inner.config.send_timeout;

        while let Ok(outbound) = self.inner.outgoing_rx.recv().await {
            if self.is_shutdown() {
                break;
            }
            let Outbound {
                destination,
                route,
                payload,
            } = outbound;

            let send = self.inner.config.host.send(payload, route, &destination).fuse();
            let deadline = Delay::new(timeout).fuse();
            futures::pin_mut!(send, deadline);

            futures::select! {
                res = send => {
                    if let Err(e) = res {
                        let err = Error::Send { target: destination.clone(), reason: e.to_string() };
                        tracing::warn!(worker, route = %route, "{}", err);
                        self.inner.counters.send_failed();
                    }
                }
                _ = deadline => {
                    tracing::warn!(worker, route = %route, "send to {} timed out after {:?}", destination, timeout);
                    self.inner.counters.send_failed();
                }
            }
        }

        tracing::trace!(worker, "send worker stopped");
    }
}

impl<P> Clone for Bmmc<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P> std::fmt::Debug for Bmmc<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bmmc")
            .field("host", &self.inner.host)
            .field("round", &self.inner.round.get())
            .field("peers", &self.inner.peers.len())
            .field("buffered", &self.inner.messages.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
