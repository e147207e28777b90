//! # StashKV - An In-Memory Key-Value Server with Named Stashes
//!
//! StashKV keeps byte keys and values in memory, split into independently
//! limited namespaces called *stashes*. Clients speak a minimal
//! length-prefixed protocol over TCP.
//!
//! ## Features
//!
//! - **Named stashes**: isolated keyspaces with their own key limit
//! - **TTL Support**: per-key expiry, lazy on read plus a periodic sweep
//! - **LRU Eviction**: a full stash drops its least recently used key
//! - **Single Writer**: every mutation runs on one task, in arrival order
//! - **Read-only port**: an optional listener that refuses writes
//! - **Snapshots**: opt-in per stash, restored at startup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              StashKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│   Writer    │                  │
//! │  │ (rw + ro)   │    │  Handler    │    │   (task)    │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │ read-only        │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Framer    │    │  CommandEngine → StashManager                │    │
//! │  │             │    │  ┌────────┐ ┌────────┐ ┌────────┐            │    │
//! │  └─────────────┘    │  │default │ │ shop   │ │ ...    │  Stashes   │    │
//! │                     │  └────────┘ └────────┘ └────────┘            │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                         ▲                          ▲                    │
//! │                         │                          │                    │
//! │              ┌──────────┴─────────┐     ┌──────────┴─────────┐          │
//! │              │   ExpirySweeper    │     │ SnapshotScheduler  │          │
//! │              └────────────────────┘     └────────────────────┘          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use stashkv::config::ServerConfig;
//! use stashkv::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! Every request is a run of tokens. `[opts]` is an optional-argument
//! count followed by that many `KEY=value` tokens.
//!
//! - `PING`
//! - `GET key [opts]` with `NAME`
//! - `SET key value [opts]` with `NAME`, `TTL`
//! - `DELETE key [opts]` with `NAME`
//! - `EXPIRE key ttl [opts]` with `NAME`
//! - `CREATE name [opts]` with `OFF_HEAP`, `MAX_KEYS`, `SNAPSHOTS`
//! - `DROP name`
//! - `INFO [opts]` with `NAME`
//! - `STATS`
//!
//! ## Module Overview
//!
//! - [`protocol`]: framing and response encoding
//! - [`storage`]: stashes, TTL wheel, LRU tracker, stash registry
//! - [`commands`]: command grammar and execution
//! - [`writer`]: the single task that applies writes
//! - [`connection`]: client connection management
//! - [`persistence`]: snapshot files and their scheduler
//! - [`server`]: listeners and background task wiring
//! - [`client`]: async client used by `stashkv-cli`

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod stats;
pub mod storage;
pub mod writer;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::CommandEngine;
pub use config::{Limits, ServerConfig, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_STASH};
pub use connection::{handle_connection, ConnectionMode};
pub use protocol::{FrameError, Framer, Response};
pub use server::{Server, ServerError};
pub use storage::{Stash, StashManager};

/// Version of StashKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
