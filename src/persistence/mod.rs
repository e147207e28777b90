//! Snapshot Persistence
//!
//! Stashes created with snapshots enabled are written to disk periodically
//! and reloaded when the server starts.
//!
//! ```text
//!  Stash (dirty flag) ──► SnapshotScheduler ──► SnapshotStore ──► <dir>/<hex>.snap
//!                                                     │
//!  StashManager::restore ◄── load_all ◄───────────────┘   (startup)
//! ```
//!
//! - [`format`]: binary helpers shared by the writer and reader
//! - [`snapshot`]: the [`SnapshotWriter`] trait, file writer and reader
//! - [`scheduler`]: the background task driven by dirty flags

pub mod format;
pub mod scheduler;
pub mod snapshot;

pub use format::FormatError;
pub use scheduler::{snapshot_dirty, SnapshotScheduler};
pub use snapshot::{read_snapshot, FileSnapshotWriter, LoadedStash, SnapshotStore, SnapshotWriter};
