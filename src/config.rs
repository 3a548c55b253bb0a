//! Configuration for a BMMC node.

use std::time::Duration;

use crate::callback::{Callback, CallbackRegistry};
use crate::error::{Error, Result};

/// Default fanout factor.
pub const DEFAULT_BETA: f64 = 0.3;

/// Default interval between gossip rounds.
pub const DEFAULT_ROUND_DURATION: Duration = Duration::from_millis(100);

/// Default number of send workers.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;

/// Default capacity of the outbound envelope queue.
pub const DEFAULT_OUTGOING_QUEUE_SIZE: usize = 1024;

/// Default bound on a single send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration options for a BMMC node.
///
/// `host` is both the node's identity (its `Display` output) and the
/// transport used for every outbound envelope.
///
/// # Example
///
/// ```
/// use bimodal_multicast::{Config, NoopPeer};
/// use std::time::Duration;
///
/// let config = Config::new(NoopPeer::new("127.0.0.1:7000"), 1024)
///     .with_beta(0.5)
///     .with_round_duration(Duration::from_millis(50));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Config<P> {
    /// This node's peer: identity and outbound transport.
    pub host: P,

    /// Fanout factor in `[0, 1]`.
    ///
    /// Each round gossips to `floor(beta * peers) + 1` peers. `0` disables
    /// gossiping entirely.
    ///
    /// Default: 0.3
    pub beta: f64,

    /// Interval between gossip rounds.
    ///
    /// Default: 100ms
    pub round_duration: Duration,

    /// Capacity of the message buffer.
    ///
    /// Older elements are evicted once the buffer is full. Peer membership
    /// changes also occupy slots.
    pub buffer_size: usize,

    /// User callbacks keyed by callback type.
    pub callbacks: CallbackRegistry,

    /// Number of workers delivering outbound envelopes.
    ///
    /// Default: 16
    pub max_concurrent_sends: usize,

    /// Capacity of the outbound queue. Envelopes beyond it are dropped.
    ///
    /// Default: 1024
    pub outgoing_queue_size: usize,

    /// Upper bound on a single [`Peer::send`](crate::Peer::send).
    ///
    /// Default: 5s
    pub send_timeout: Duration,
}

impl<P> Config<P> {
    /// Create a configuration with default values.
    pub fn new(host: P, buffer_size: usize) -> Self {
        Self {
            host,
            beta: DEFAULT_BETA,
            round_duration: DEFAULT_ROUND_DURATION,
            buffer_size,
            callbacks: CallbackRegistry::new(),
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            outgoing_queue_size: DEFAULT_OUTGOING_QUEUE_SIZE,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Configuration tuned for small, local test clusters.
    ///
    /// - Short rounds
    /// - Aggressive fanout
    /// - Short send timeout
    pub fn local(host: P, buffer_size: usize) -> Self {
        Self::new(host, buffer_size)
            .with_beta(0.5)
            .with_round_duration(Duration::from_millis(20))
            .with_send_timeout(Duration::from_millis(500))
    }

    /// Set the fanout factor (builder pattern).
    pub fn with_beta(mut self, beta: f64) -> Self {
        self.beta = beta;
        self
    }

    /// Set the round duration (builder pattern).
    pub fn with_round_duration(mut self, round_duration: Duration) -> Self {
        self.round_duration = round_duration;
        self
    }

    /// Set the message buffer capacity (builder pattern).
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Replace the callback registry (builder pattern).
    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Register a single callback (builder pattern).
    ///
    /// # Example
    ///
    /// ```
    /// use bimodal_multicast::{CallbackError, Config, Element, NoopPeer};
    ///
    /// let config = Config::new(NoopPeer::new("node-1"), 64).with_callback(
    ///     "print",
    ///     |el: &Element| -> Result<(), CallbackError> {
    ///         println!("{}", el.msg);
    ///         Ok(())
    ///     },
    /// );
    /// assert!(config.callbacks.contains("print"));
    /// ```
    pub fn with_callback(mut self, callback_type: impl Into<String>, callback: impl Callback) -> Self {
        self.callbacks.insert(callback_type, callback);
        self
    }

    /// Set the number of send workers (builder pattern).
    pub fn with_max_concurrent_sends(mut self, workers: usize) -> Self {
        self.max_concurrent_sends = workers;
        self
    }

    /// Set the outbound queue capacity (builder pattern).
    pub fn with_outgoing_queue_size(mut self, size: usize) -> Self {
        self.outgoing_queue_size = size;
        self
    }

    /// Set the per-send timeout (builder pattern).
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::NotAllowed`] if a user callback uses a reserved type.
    /// - [`Error::Config`] for out-of-range numeric options.
    pub fn validate(&self) -> Result<()> {
        self.callbacks.validate()?;

        if !self.beta.is_finite() || !(0.0..=1.0).contains(&self.beta) {
            return Err(Error::Config(format!(
                "beta must be within [0, 1], got {}",
                self.beta
            )));
        }
        if self.round_duration.is_zero() {
            return Err(Error::Config("round_duration must be non-zero".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be at least 1".into()));
        }
        if self.max_concurrent_sends == 0 {
            return Err(Error::Config(
                "max_concurrent_sends must be at least 1".into(),
            ));
        }
        if self.outgoing_queue_size == 0 {
            return Err(Error::Config(
                "outgoing_queue_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
