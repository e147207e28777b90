//! LRU Eviction Tracker
//!
//! Keeps keys ordered by last access so a full stash can give up its
//! coldest key. Every access takes the next value of a monotonic counter;
//! the smallest sequence number is the least recently used key.
//!
//! ```text
//!  recency: { seq → key }      7:"a"  9:"c"  12:"b"
//!  index:   { key → seq }      evict() pops 7:"a"
//! ```

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};

/// Least-recently-used ordering over a stash's keys.
#[derive(Debug, Default)]
pub struct LruTracker {
    recency: BTreeMap<u64, Bytes>,
    index: HashMap<Bytes, u64>,
    next_seq: u64,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` was just read or written.
    pub fn add(&mut self, key: Bytes) {
        let seq = self.next_seq;
        self.next_seq += 1;

        if let Some(old) = self.index.insert(key.clone(), seq) {
            self.recency.remove(&old);
        }
        self.recency.insert(seq, key);
    }

    /// Stops tracking `key`. Returns true if it was tracked.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.index.remove(key) {
            Some(seq) => {
                self.recency.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// Removes and returns the least recently used key.
    pub fn evict(&mut self) -> Option<Bytes> {
        let (_, key) = self.recency.pop_first()?;
        self.index.remove(&key);
        Some(key)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.recency.clear();
        self.index.clear();
    }
}
