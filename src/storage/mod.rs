//! Storage Module
//!
//! Named stashes and everything that keeps them within their limits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────── StashManager ───────────────────────────┐
//! │  DashMap<name, Arc<Stash>>                                         │
//! │                                                                    │
//! │   ┌──────── Stash "default" ────────┐  ┌──────── Stash "shop" ───┐ │
//! │   │ HashMap<key, value>             │  │ ...                     │ │
//! │   │ TtlWheel     (active expiry)    │  │                         │ │
//! │   │ LruTracker   (capacity)         │  │                         │ │
//! │   └─────────────────────────────────┘  └─────────────────────────┘ │
//! └────────────────────────────────────────────────────────────────────┘
//!                               ▲
//!                               │ writer.sweep()
//!                  ┌────────────┴────────────┐
//!                  │      ExpirySweeper      │
//!                  │ (Background Tokio Task) │
//!                  └─────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use stashkv::config::StashDefaults;
//! use stashkv::storage::{StashManager, StashOptions};
//! use bytes::Bytes;
//!
//! let manager = StashManager::new(16, StashDefaults::default());
//! manager.create_stash("shop", StashOptions::default()).unwrap();
//!
//! let shop = manager.get_stash("shop").unwrap();
//! shop.set(Bytes::from("item"), Bytes::from("fries")).unwrap();
//! assert_eq!(shop.get(b"item", false).unwrap(), Some(Bytes::from("fries")));
//!
//! // other stashes don't see it
//! let default = manager.get_stash("default").unwrap();
//! assert_eq!(default.get(b"item", false).unwrap(), None);
//! ```

pub mod eviction;
pub mod expiry;
pub mod manager;
pub mod stash;
pub mod ttl;

pub use eviction::LruTracker;
pub use expiry::ExpirySweeper;
pub use manager::{ManagerError, StashManager};
pub use stash::{Stash, StashEntry, StashError, StashOptions, StashResult};
pub use ttl::{epoch_millis, TtlWheel};
