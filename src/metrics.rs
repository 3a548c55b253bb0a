//! Metrics for the BMMC protocol.
//!
//! Provides counters and gauges for monitoring protocol activity.
//!
//! ## Available Metrics
//!
//! ### Counters
//! - `bmmc_gossip_sent_total` - Gossip envelopes enqueued
//! - `bmmc_solicitation_sent_total` - Solicitation envelopes enqueued
//! - `bmmc_synchronization_sent_total` - Synchronization envelopes enqueued
//! - `bmmc_elements_delivered_total` - Elements inserted into the buffer
//! - `bmmc_elements_duplicate_total` - Received elements already buffered
//! - `bmmc_elements_too_old_total` - Received elements older than a full buffer
//! - `bmmc_callback_failures_total` - Callbacks that returned an error
//! - `bmmc_send_failures_total` - Sends that failed or timed out
//! - `bmmc_outgoing_dropped_total` - Envelopes dropped on a full outbound queue
//! - `bmmc_decode_failures_total` - Inbound envelopes that failed to decode
//!
//! ### Gauges
//! - `bmmc_round` - Current gossip round
//! - `bmmc_peers` - Current number of peers
//! - `bmmc_buffer_size` - Current number of buffered elements

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Initialize metric descriptions.
///
/// Call this once at application startup to register all metric descriptions.
pub fn init_metrics() {
    describe_counter!(
        "bmmc_gossip_sent_total",
        "Total number of Gossip envelopes enqueued"
    );
    describe_counter!(
        "bmmc_solicitation_sent_total",
        "Total number of Solicitation envelopes enqueued"
    );
    describe_counter!(
        "bmmc_synchronization_sent_total",
        "Total number of Synchronization envelopes enqueued"
    );
    describe_counter!(
        "bmmc_elements_delivered_total",
        "Total number of elements inserted into the message buffer"
    );
    describe_counter!(
        "bmmc_elements_duplicate_total",
        "Total number of received elements that were already buffered"
    );
    describe_counter!(
        "bmmc_elements_too_old_total",
        "Total number of received elements rejected by a full buffer"
    );
    describe_counter!(
        "bmmc_callback_failures_total",
        "Total number of callbacks that returned an error"
    );
    describe_counter!(
        "bmmc_send_failures_total",
        "Total number of failed or timed out sends"
    );
    describe_counter!(
        "bmmc_outgoing_dropped_total",
        "Total number of envelopes dropped because the outbound queue was full"
    );
    describe_counter!(
        "bmmc_decode_failures_total",
        "Total number of inbound envelopes that failed to decode"
    );

    describe_gauge!("bmmc_round", "Current gossip round");
    describe_gauge!("bmmc_peers", "Current number of peers");
    describe_gauge!("bmmc_buffer_size", "Current number of buffered elements");
}

/// Record a Gossip envelope enqueued.
pub fn record_gossip_sent() {
    counter!("bmmc_gossip_sent_total").increment(1);
}

/// Record a Solicitation envelope enqueued.
pub fn record_solicitation_sent() {
    counter!("bmmc_solicitation_sent_total").increment(1);
}

/// Record a Synchronization envelope enqueued.
pub fn record_synchronization_sent() {
    counter!("bmmc_synchronization_sent_total").increment(1);
}

/// Record an element inserted into the buffer.
pub fn record_delivery() {
    counter!("bmmc_elements_delivered_total").increment(1);
}

/// Record a duplicate element.
pub fn record_duplicate() {
    counter!("bmmc_elements_duplicate_total").increment(1);
}

/// Record an element rejected as too old.
pub fn record_too_old() {
    counter!("bmmc_elements_too_old_total").increment(1);
}

/// Record a failed callback.
pub fn record_callback_failure() {
    counter!("bmmc_callback_failures_total").increment(1);
}

/// Record a failed send.
pub fn record_send_failure() {
    counter!("bmmc_send_failures_total").increment(1);
}

/// Record an envelope dropped on a full outbound queue.
pub fn record_outgoing_dropped() {
    counter!("bmmc_outgoing_dropped_total").increment(1);
}

/// Record an inbound envelope that failed to decode.
pub fn record_decode_failure() {
    counter!("bmmc_decode_failures_total").increment(1);
}

/// Update the round gauge.
pub fn set_round(round: i64) {
    gauge!("bmmc_round").set(round as f64);
}

/// Update the peers gauge.
pub fn set_peers(count: usize) {
    gauge!("bmmc_peers").set(count as f64);
}

/// Update the buffer size gauge.
pub fn set_buffer_size(count: usize) {
    gauge!("bmmc_buffer_size").set(count as f64);
}
