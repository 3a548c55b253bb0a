//! Error types for the Bimodal Multicast protocol.

use std::fmt;

/// Result type alias for BMMC operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
///
/// Handlers use the kind to decide whether a failure is propagated to the
/// caller or only logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid configuration.
    Validation,
    /// An element with the same timestamp or id is already buffered.
    AlreadyExists,
    /// The element is older than everything in a full buffer.
    TooOld,
    /// Inbound bytes could not be parsed.
    Decode,
    /// Outbound bytes could not be produced.
    Encode,
    /// An outbound send failed.
    Transport,
    /// A delivery callback returned an error.
    Callback,
    /// Lifecycle misuse (double start, use after stop).
    Lifecycle,
}

/// Errors that can occur during BMMC operations.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(String),

    /// A user callback uses a callback type reserved for the protocol.
    NotAllowed(String),

    /// An element with the same timestamp (or id) already exists in the buffer.
    AlreadyExists {
        /// Id of the rejected element.
        id: String,
    },

    /// The buffer is full and the element is older than the oldest buffered one.
    TooOld {
        /// Id of the rejected element.
        id: String,
    },

    /// Failed to decode an inbound envelope.
    Decode(String),

    /// Failed to encode an outbound envelope or payload.
    Encode(String),

    /// Network send operation failed.
    Send {
        /// Peer that we failed to send to.
        target: String,
        /// Underlying error message.
        reason: String,
    },

    /// A delivery callback failed.
    Callback {
        /// Callback type that was dispatched.
        callback_type: String,
        /// Underlying error message.
        reason: String,
    },

    /// The engine was already started.
    AlreadyStarted,

    /// The engine has been stopped.
    Shutdown,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::NotAllowed(_) => ErrorKind::Validation,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::TooOld { .. } => ErrorKind::TooOld,
            Error::Decode(_) => ErrorKind::Decode,
            Error::Encode(_) => ErrorKind::Encode,
            Error::Send { .. } => ErrorKind::Transport,
            Error::Callback { .. } => ErrorKind::Callback,
            Error::AlreadyStarted | Error::Shutdown => ErrorKind::Lifecycle,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => {
                write!(f, "configuration error: {}", msg)
            }
            Error::NotAllowed(callback_type) => {
                write!(f, "callback type {:?} is not allowed", callback_type)
            }
            Error::AlreadyExists { id } => {
                write!(f, "element {} already exists in buffer", id)
            }
            Error::TooOld { id } => {
                write!(f, "element {} is older than every buffered element", id)
            }
            Error::Decode(msg) => {
                write!(f, "failed to decode message: {}", msg)
            }
            Error::Encode(msg) => {
                write!(f, "failed to encode message: {}", msg)
            }
            Error::Send { target, reason } => {
                write!(f, "failed to send to {}: {}", target, reason)
            }
            Error::Callback {
                callback_type,
                reason,
            } => {
                write!(f, "callback {} failed: {}", callback_type, reason)
            }
            Error::AlreadyStarted => {
                write!(f, "bmmc instance is already running")
            }
            Error::Shutdown => {
                write!(f, "bmmc instance has been shut down")
            }
        }
    }
}

impl std::error::Error for Error {}
