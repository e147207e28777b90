//! Stash: One Named Namespace
//!
//! A stash owns three structures that always agree on which keys exist:
//!
//! ```text
//!  ┌──────────────────────── Stash ─────────────────────────┐
//!  │  RwLock<Option<StashState>>      (None once dropped)   │
//!  │   ├── data: HashMap<key, value>                        │
//!  │   ├── ttl:  TtlWheel     (keys with an expiration)     │
//!  │   └── lru:  LruTracker   (every key, by recency)       │
//!  │  snapshot: Option<SnapshotState>  (dirty flag)         │
//!  └────────────────────────────────────────────────────────┘
//! ```
//!
//! Only the writer task ever takes the write lock, so the lock never sees
//! writer contention; it exists so read-only connections can look values
//! up while the writer works. Every write path updates all three
//! structures under the same guard.
//!
//! Dropping a stash replaces its state with `None`. Anyone still holding an
//! `Arc<Stash>` then gets [`StashError::Closed`] instead of data.

use crate::storage::eviction::LruTracker;
use crate::storage::ttl::{epoch_millis, TtlWheel};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

/// Errors returned by stash operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StashError {
    /// The stash was dropped while the caller still held it
    #[error("DB_CLOSED")]
    Closed,
}

/// Result type for stash operations.
pub type StashResult<T> = Result<T, StashError>;

/// Settings fixed when a stash is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StashOptions {
    /// Keys beyond this count are evicted, least recently used first
    pub max_key_count: usize,
    /// Whether the stash is written to snapshots
    pub snapshots: bool,
    /// Recorded for clients that ask for it; storage is the same either way
    pub off_heap: bool,
}

impl Default for StashOptions {
    fn default() -> Self {
        Self {
            max_key_count: 1_000_000,
            snapshots: false,
            off_heap: false,
        }
    }
}

/// The mutable part of a live stash.
#[derive(Debug, Default)]
struct StashState {
    data: HashMap<Bytes, Bytes>,
    ttl: TtlWheel,
    lru: LruTracker,
}

impl StashState {
    /// Removes a key from all three structures.
    fn remove(&mut self, key: &[u8]) -> bool {
        self.ttl.remove(key);
        self.lru.remove(key);
        self.data.remove(key).is_some()
    }

    /// Evicts least recently used keys until the stash fits its limit.
    fn evict_to(&mut self, max_key_count: usize) -> usize {
        let mut evicted = 0;
        while self.data.len() > max_key_count {
            let Some(victim) = self.lru.evict() else {
                break;
            };
            self.ttl.remove(&victim);
            self.data.remove(&victim);
            evicted += 1;
        }
        evicted
    }
}

/// Marks a stash as needing its next snapshot.
#[derive(Debug, Default)]
struct SnapshotState {
    dirty: AtomicBool,
}

/// A single named key-value namespace.
#[derive(Debug)]
pub struct Stash {
    name: String,
    options: StashOptions,
    state: RwLock<Option<StashState>>,
    snapshot: Option<SnapshotState>,
}

/// One live entry, as handed to the snapshot writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute expiration in epoch milliseconds
    pub expires_at: Option<u64>,
}

impl Stash {
    /// Creates an empty stash.
    pub fn new(name: impl Into<String>, options: StashOptions) -> Self {
        let options = StashOptions {
            max_key_count: options.max_key_count.max(1),
            ..options
        };
        Self {
            name: name.into(),
            options,
            state: RwLock::new(Some(StashState::default())),
            snapshot: options.snapshots.then(SnapshotState::default),
        }
    }

    /// The stash's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The options it was created with.
    pub fn options(&self) -> StashOptions {
        self.options
    }

    /// Returns true once the stash has been dropped.
    pub fn is_closed(&self) -> bool {
        self.state.read().is_none()
    }

    /// Stores a value, keeping any live TTL the key already has.
    pub fn set(&self, key: Bytes, value: Bytes) -> StashResult<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        // an expired TTL the sweep hasn't reached yet must not carry over
        if state.ttl.is_expired(&key) {
            state.ttl.remove(&key);
        }

        state.data.insert(key.clone(), value);
        state.lru.add(key);
        self.evict_locked(state);
        self.mark_dirty();
        Ok(())
    }

    /// Stores a value that expires `ttl_ms` from now.
    pub fn set_with_ttl(&self, key: Bytes, value: Bytes, ttl_ms: u64) -> StashResult<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        state.data.insert(key.clone(), value);
        state.ttl.add(key.clone(), ttl_ms);
        state.lru.add(key);
        self.evict_locked(state);
        self.mark_dirty();
        Ok(())
    }

    /// Looks up a value.
    ///
    /// An expired key reads as missing. A read-write caller also removes it
    /// and refreshes the key's recency on a hit; a read-only caller never
    /// mutates anything.
    pub fn get(&self, key: &[u8], read_only: bool) -> StashResult<Option<Bytes>> {
        if read_only {
            let guard = self.state.read();
            let state = guard.as_ref().ok_or(StashError::Closed)?;
            if state.ttl.is_expired(key) {
                return Ok(None);
            }
            return Ok(state.data.get(key).cloned());
        }

        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        if state.ttl.is_expired(key) {
            state.remove(key);
            trace!(stash = %self.name, "Lazily expired key on read");
            self.mark_dirty();
            return Ok(None);
        }

        match state.data.get_key_value(key) {
            Some((stored_key, value)) => {
                let value = value.clone();
                let stored_key = stored_key.clone();
                state.lru.add(stored_key);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Returns true if the key holds a live value.
    pub fn contains(&self, key: &[u8]) -> StashResult<bool> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StashError::Closed)?;
        Ok(state.data.contains_key(key) && !state.ttl.is_expired(key))
    }

    /// Removes a key. Missing keys are fine.
    pub fn delete(&self, key: &[u8]) -> StashResult<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;
        let removed = state.remove(key);
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Gives an existing key a new TTL.
    ///
    /// Returns false, changing nothing, if the key is missing or expired.
    pub fn update_ttl(&self, key: &[u8], ttl_ms: u64) -> StashResult<bool> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        let Some((stored_key, _)) = state.data.get_key_value(key) else {
            return Ok(false);
        };
        if state.ttl.is_expired(key) {
            return Ok(false);
        }

        let stored_key = stored_key.clone();
        state.ttl.add(stored_key, ttl_ms);
        self.mark_dirty();
        Ok(true)
    }

    /// Evicts least recently used keys until the stash fits its limit.
    ///
    /// Returns the number of keys evicted.
    pub fn evict_keys(&self) -> StashResult<usize> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;
        Ok(self.evict_locked(state))
    }

    /// Removes one batch of keys whose TTL has passed.
    ///
    /// Returns the number of keys removed.
    pub fn expire_ttl_keys(&self) -> StashResult<usize> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        let expired = state.ttl.expire_batch();
        for key in &expired {
            state.data.remove(key);
            state.lru.remove(key);
        }
        if !expired.is_empty() {
            self.mark_dirty();
        }
        Ok(expired.len())
    }

    /// Tombstones the stash and frees its memory.
    ///
    /// Later operations fail with [`StashError::Closed`].
    pub fn drop_stash(&self) {
        let previous = self.state.write().take();
        if let Some(state) = previous {
            debug!(stash = %self.name, keys = state.data.len(), "Stash dropped");
        }
    }

    /// Number of keys currently stored, expired-but-unswept ones included.
    pub fn len(&self) -> StashResult<usize> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StashError::Closed)?;
        Ok(state.data.len())
    }

    /// Returns true if the stash holds no keys.
    pub fn is_empty(&self) -> StashResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// A point-in-time, human-readable summary.
    pub fn info(&self) -> StashResult<String> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StashError::Closed)?;

        let mut out = String::new();
        let _ = write!(
            out,
            "# Stash\r\n\
             name:{}\r\n\
             keys:{}\r\n\
             max_keys:{}\r\n\
             keys_with_ttl:{}\r\n\
             snapshots:{}\r\n\
             off_heap:{}\r\n",
            self.name,
            state.data.len(),
            self.options.max_key_count,
            state.ttl.len(),
            self.options.snapshots,
            self.options.off_heap,
        );
        Ok(out)
    }

    /// Every live entry, for writing a snapshot.
    pub fn entries(&self) -> StashResult<Vec<StashEntry>> {
        let guard = self.state.read();
        let state = guard.as_ref().ok_or(StashError::Closed)?;

        let now = epoch_millis();
        Ok(state
            .data
            .iter()
            .filter(|(key, _)| !state.ttl.is_expired_at(key, now))
            .map(|(key, value)| StashEntry {
                key: key.clone(),
                value: value.clone(),
                expires_at: state.ttl.expiration_time(key),
            })
            .collect())
    }

    /// Loads an entry from a snapshot.
    ///
    /// Does not mark the stash dirty; the entry is already on disk.
    pub fn restore(&self, entry: StashEntry) -> StashResult<()> {
        let mut guard = self.state.write();
        let state = guard.as_mut().ok_or(StashError::Closed)?;

        if let Some(expires_at) = entry.expires_at {
            state.ttl.insert_expiration(entry.key.clone(), expires_at);
        } else {
            state.ttl.remove(&entry.key);
        }
        state.data.insert(entry.key.clone(), entry.value);
        state.lru.add(entry.key);
        self.evict_locked(state);
        Ok(())
    }

    /// Returns true if this stash takes snapshots.
    pub fn snapshots_enabled(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Clears and returns the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.snapshot
            .as_ref()
            .map(|s| s.dirty.swap(false, Ordering::AcqRel))
            .unwrap_or(false)
    }

    /// Flags the stash for the next snapshot pass.
    pub(crate) fn mark_dirty(&self) {
        if let Some(snapshot) = &self.snapshot {
            snapshot.dirty.store(true, Ordering::Release);
        }
    }

    fn evict_locked(&self, state: &mut StashState) -> usize {
        let evicted = state.evict_to(self.options.max_key_count);
        if evicted > 0 {
            trace!(stash = %self.name, evicted, "Evicted keys over capacity");
        }
        evicted
    }
}
