//! Bounded, timestamp-ordered message buffer.
//!
//! Elements are kept newest first. When the buffer is full, inserting a
//! newer element evicts the oldest one, and an element older than the
//! oldest buffered one is rejected. The digest (ordered list of ids) is
//! what a node advertises in its gossip rounds.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashSet;

use super::Element;
use crate::error::{Error, Result};

/// Thread-safe bounded buffer of [`Element`]s, ordered by descending timestamp.
#[derive(Debug)]
pub struct MessageBuffer {
    inner: RwLock<Vec<Element>>,
    capacity: usize,
}

impl MessageBuffer {
    /// Create a buffer holding at most `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Vec::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Insert an element at its timestamp position.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyExists`] if an element with the same timestamp or id
    ///   is buffered.
    /// - [`Error::TooOld`] if the buffer is full and `element` is older than
    ///   every buffered element.
    pub fn add(&self, element: Element) -> Result<()> {
        let mut elements = self.inner.write();

        let mut position = None;
        for (i, existing) in elements.iter().enumerate() {
            if existing.timestamp == element.timestamp || existing.id == element.id {
                return Err(Error::AlreadyExists { id: element.id });
            }
            if position.is_none() && element.timestamp > existing.timestamp {
                position = Some(i);
            }
        }

        let full = elements.len() >= self.capacity;
        let position = match position {
            Some(i) => i,
            None if full => return Err(Error::TooOld { id: element.id }),
            None => elements.len(),
        };

        if full {
            elements.pop();
        }
        elements.insert(position, element);
        Ok(())
    }

    /// Number of buffered elements.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Maximum number of elements.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check if an element with `id` is buffered.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().iter().any(|el| el.id == id)
    }

    /// Ids of all buffered elements, newest first.
    pub fn digest(&self) -> Vec<String> {
        self.inner.read().iter().map(|el| el.id.clone()).collect()
    }

    /// Ids from `remote_digest` that are not buffered locally, in remote order.
    pub fn missing(&self, remote_digest: &[String]) -> Vec<String> {
        let elements = self.inner.read();
        let local: HashSet<&str> = elements.iter().map(|el| el.id.as_str()).collect();
        remote_digest
            .iter()
            .filter(|id| !local.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Buffered elements whose id is in `ids`, in buffer order.
    ///
    /// Unknown ids are skipped.
    pub fn elements_by_ids(&self, ids: &[String]) -> Vec<Element> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        self.inner
            .read()
            .iter()
            .filter(|el| wanted.contains(el.id.as_str()))
            .cloned()
            .collect()
    }

    /// Snapshot of every buffered element, newest first.
    pub fn elements(&self) -> Vec<Element> {
        self.inner.read().clone()
    }

    /// Payloads of buffered elements, newest first.
    ///
    /// Internal (peer-membership) elements are skipped unless
    /// `include_internal` is set.
    pub fn messages(&self, include_internal: bool) -> Vec<Value> {
        self.inner
            .read()
            .iter()
            .filter(|el| include_internal || !el.internal)
            .map(|el| el.msg.clone())
            .collect()
    }

    /// Bump the gossip count of every buffered element.
    pub fn increment_gossip_count(&self) {
        for el in self.inner.write().iter_mut() {
            el.gossip_count = el.gossip_count.saturating_add(1);
        }
    }
}
