//! Gossip round counter.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Largest round number before the counter wraps back to 1.
pub const MAX_ROUND_NUMBER: i64 = i64::MAX - 10;

/// Round number as carried on the wire: `{"number": n}`.
///
/// Envelopes always carry a copy taken when the envelope is built, so a
/// later increment by the gossiper never changes what is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundNumber {
    /// Round value.
    pub number: i64,
}

impl RoundNumber {
    /// Wrap a raw round value.
    pub const fn new(number: i64) -> Self {
        Self { number }
    }
}

/// Thread-safe, monotonic round counter with wrap-around.
#[derive(Debug, Default)]
pub struct GossipRound {
    number: AtomicI64,
}

impl GossipRound {
    /// Create a counter starting at 0.
    pub fn new() -> Self {
        Self::with_number(0)
    }

    /// Create a counter starting at `number`.
    pub fn with_number(number: i64) -> Self {
        Self {
            number: AtomicI64::new(number),
        }
    }

    /// Advance by one round, wrapping to 1 past [`MAX_ROUND_NUMBER`].
    pub fn increment(&self) {
        // The closure always returns Some, so fetch_update cannot fail.
        let _ = self
            .number
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                let next = n.saturating_add(1);
                Some(if next > MAX_ROUND_NUMBER { 1 } else { next })
            });
    }

    /// Current round value.
    pub fn get(&self) -> i64 {
        self.number.load(Ordering::Acquire)
    }

    /// Copy of the current round for embedding in an envelope.
    pub fn snapshot(&self) -> RoundNumber {
        RoundNumber::new(self.get())
    }
}
