//! Message buffer elements.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::sync::atomic::{AtomicI64, Ordering};

/// Callback type for messages that do not trigger a user callback.
pub const NO_CALLBACK: &str = "no-callback";

/// Last timestamp handed out by [`next_timestamp`], in nanoseconds since
/// the UNIX epoch.
static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(i64::MIN);

/// Produce a creation timestamp that is strictly greater than every
/// timestamp previously produced in this process.
///
/// The buffer treats equal timestamps as duplicates, so two messages added
/// within the same clock tick must still get distinct timestamps.
fn next_timestamp() -> DateTime<Utc> {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX - 1);
    let mut prev = LAST_TIMESTAMP.load(Ordering::Relaxed);
    loop {
        let next = now.max(prev.saturating_add(1));
        match LAST_TIMESTAMP.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
        {
            Ok(_) => return DateTime::from_timestamp_nanos(next),
            Err(actual) => prev = actual,
        }
    }
}

/// Render a payload the way it is hashed into an element id.
///
/// JSON strings hash their raw contents; everything else hashes its
/// compact JSON text.
pub(crate) fn stringify_payload(msg: &Value) -> String {
    match msg {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Generate an element id: SHA-1 of the payload, creation second and a
/// random suffix.
fn generate_id(msg: &Value, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha1::new();
    hasher.update(stringify_payload(msg).as_bytes());
    let hash = hex::encode(hasher.finalize());

    let suffix: i32 = rand::rng().random_range(0..=i32::MAX);
    format!("{}-{}-{}", hash, timestamp.format("%Y%m%d%H%M%S"), suffix)
}

/// One entry in the message buffer.
///
/// The JSON representation is part of the wire format:
///
/// ```text
/// { "id", "timestamp", "msg", "callbackType", "gossipCount", "internal" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Content-derived identifier.
    pub id: String,
    /// Creation time; the buffer ordering key.
    pub timestamp: DateTime<Utc>,
    /// User payload.
    pub msg: Value,
    /// Key into the callback registry.
    pub callback_type: String,
    /// Rounds since the element entered the local buffer.
    pub gossip_count: i64,
    /// Peer-membership element, hidden from user-facing message views.
    #[serde(default)]
    pub internal: bool,
}

impl Element {
    /// Create a user element.
    pub fn new(msg: Value, callback_type: impl Into<String>) -> Self {
        Self::build(msg, callback_type.into(), false)
    }

    /// Create an internal (peer-membership) element.
    pub fn new_internal(msg: Value, callback_type: impl Into<String>) -> Self {
        Self::build(msg, callback_type.into(), true)
    }

    fn build(msg: Value, callback_type: String, internal: bool) -> Self {
        let timestamp = next_timestamp();
        let id = generate_id(&msg, &timestamp);
        Self {
            id,
            timestamp,
            msg,
            callback_type,
            gossip_count: 0,
            internal,
        }
    }

    /// Whether delivery of this element dispatches any callback.
    pub fn has_callback(&self) -> bool {
        self.callback_type != NO_CALLBACK
    }
}
