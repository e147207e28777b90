//! Stash Manager
//!
//! The registry of named stashes. Lookups come from every connection task at
//! once, so the registry is a [`DashMap`]; creating and dropping only ever
//! happen on the writer task.
//!
//! ```text
//!  "default" ──► Arc<Stash>      (created in new(), never dropped)
//!  "shop"    ──► Arc<Stash>
//!  "cache"   ──► Arc<Stash>
//! ```
//!
//! Callers get a cloned `Arc<Stash>` and never hold a map guard across an
//! operation. A stash dropped while someone still holds its `Arc` reports
//! [`StashError::Closed`](super::stash::StashError::Closed) from then on.

use crate::config::{StashDefaults, DEFAULT_STASH};
use crate::persistence::{LoadedStash, SnapshotStore};
use crate::storage::stash::{Stash, StashOptions};
use crate::storage::ttl::EXPIRE_BATCH_LIMIT;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on sweep batches per stash in one pass, so a stash with a
/// large backlog can't starve the writer.
pub const SWEEP_ROUNDS: usize = 16;

/// Errors from registry operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error("STASH_LIMIT_REACHED")]
    LimitReached,

    #[error("CANNOT_DROP_DEFAULT")]
    CannotDropDefault,

    #[error("STASH_DOESNT_EXIST")]
    NotFound,
}

/// Registry of every stash on the server.
#[derive(Debug)]
pub struct StashManager {
    stashes: DashMap<String, Arc<Stash>>,
    max_stashes: usize,
    defaults: StashDefaults,
    snapshots: Option<Arc<SnapshotStore>>,
}

impl StashManager {
    /// Creates a registry holding only the default stash.
    pub fn new(max_stashes: usize, defaults: StashDefaults) -> Self {
        Self::build(max_stashes, defaults, None)
    }

    /// Like [`new`](Self::new), with snapshot files kept in `store`.
    pub fn with_snapshots(
        max_stashes: usize,
        defaults: StashDefaults,
        store: Arc<SnapshotStore>,
    ) -> Self {
        Self::build(max_stashes, defaults, Some(store))
    }

    fn build(
        max_stashes: usize,
        defaults: StashDefaults,
        snapshots: Option<Arc<SnapshotStore>>,
    ) -> Self {
        let manager = Self {
            stashes: DashMap::new(),
            max_stashes: max_stashes.max(1),
            defaults,
            snapshots,
        };
        let default = Stash::new(DEFAULT_STASH, manager.default_options());
        manager
            .stashes
            .insert(DEFAULT_STASH.to_string(), Arc::new(default));
        manager
    }

    /// Options for a stash created without any.
    pub fn default_options(&self) -> StashOptions {
        StashOptions {
            max_key_count: self.defaults.max_key_count,
            snapshots: self.defaults.snapshots,
            off_heap: false,
        }
    }

    /// Creates a stash. An existing name is left untouched and is not an error.
    pub fn create_stash(&self, name: &str, options: StashOptions) -> Result<(), ManagerError> {
        if self.stashes.contains_key(name) {
            return Ok(());
        }
        if self.stashes.len() >= self.max_stashes {
            return Err(ManagerError::LimitReached);
        }

        if let Entry::Vacant(slot) = self.stashes.entry(name.to_string()) {
            slot.insert(Arc::new(Stash::new(name, options)));
            info!(stash = %name, max_keys = options.max_key_count, "Stash created");
        }
        Ok(())
    }

    /// Looks up a stash by name.
    pub fn get_stash(&self, name: &str) -> Option<Arc<Stash>> {
        self.stashes.get(name).map(|s| Arc::clone(s.value()))
    }

    pub fn contains_stash(&self, name: &str) -> bool {
        self.stashes.contains_key(name)
    }

    /// Drops a stash and its snapshot file.
    ///
    /// The stash leaves the registry before it is torn down, so a concurrent
    /// lookup sees either the live stash or nothing. Inside a runtime the
    /// file is removed on the blocking pool; the writer does not wait for it.
    pub fn drop_stash(&self, name: &str) -> Result<(), ManagerError> {
        if name == DEFAULT_STASH {
            return Err(ManagerError::CannotDropDefault);
        }
        let (_, stash) = self.stashes.remove(name).ok_or(ManagerError::NotFound)?;
        stash.drop_stash();

        if let Some(store) = &self.snapshots {
            remove_snapshot(Arc::clone(store), name.to_string());
        }
        info!(stash = %name, "Stash dropped");
        Ok(())
    }

    /// Runs the active expiry sweep over every stash.
    ///
    /// Each stash gets batches until one comes back short, capped at
    /// [`SWEEP_ROUNDS`]. Returns the number of keys removed.
    pub fn expire_ttl_keys(&self) -> usize {
        let mut total = 0;
        for stash in self.all_stashes() {
            for _ in 0..SWEEP_ROUNDS {
                match stash.expire_ttl_keys() {
                    Ok(n) => {
                        total += n;
                        if n < EXPIRE_BATCH_LIMIT {
                            break;
                        }
                    }
                    // dropped mid-sweep
                    Err(_) => break,
                }
            }
        }
        if total > 0 {
            debug!(expired = total, "Active expiry sweep");
        }
        total
    }

    /// A snapshot of the registry's current members.
    pub fn all_stashes(&self) -> Vec<Arc<Stash>> {
        self.stashes.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Names of every stash, sorted.
    pub fn stash_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stashes.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stash_count(&self) -> usize {
        self.stashes.len()
    }

    pub fn max_stashes(&self) -> usize {
        self.max_stashes
    }

    /// Keys across every live stash.
    pub fn total_keys(&self) -> usize {
        self.all_stashes()
            .iter()
            .filter_map(|s| s.len().ok())
            .sum()
    }

    /// Where snapshots go, when persistence is enabled.
    pub fn snapshot_store(&self) -> Option<&Arc<SnapshotStore>> {
        self.snapshots.as_ref()
    }

    /// Repopulates the registry from snapshots read at startup.
    ///
    /// Returns the number of stashes restored.
    pub fn restore(&self, loaded: Vec<LoadedStash>) -> usize {
        let mut restored = 0;
        for snapshot in loaded {
            let stash = match self.get_stash(&snapshot.name) {
                Some(existing) => existing,
                None => {
                    let options = StashOptions {
                        max_key_count: snapshot.max_key_count,
                        snapshots: true,
                        off_heap: snapshot.off_heap,
                    };
                    if let Err(e) = self.create_stash(&snapshot.name, options) {
                        warn!(stash = %snapshot.name, error = %e, "Snapshot not restored");
                        continue;
                    }
                    match self.get_stash(&snapshot.name) {
                        Some(stash) => stash,
                        None => continue,
                    }
                }
            };

            let keys = snapshot.entries.len();
            for entry in snapshot.entries {
                if stash.restore(entry).is_err() {
                    break;
                }
            }
            info!(stash = %snapshot.name, keys, "Stash restored from snapshot");
            restored += 1;
        }
        restored
    }
}

fn remove_snapshot(store: Arc<SnapshotStore>, name: String) {
    let delete = move || {
        if let Err(e) = store.delete(&name) {
            warn!(stash = %name, error = %e, "Failed to delete snapshot of dropped stash");
        }
    };
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => drop(runtime.spawn_blocking(delete)),
        // outside a runtime there is no task to block
        Err(_) => delete(),
    }
}
