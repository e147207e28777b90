//! Command Module
//!
//! Everything between the framer's token queue and the stashes.
//!
//! ```text
//! Token queue (VecDeque<Bytes>)
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  CommandTable   │  name → CommandSpec  (parse module)
//! │  parse()        │  Incomplete | Invalid | Parsed
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandEngine   │  (handler module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StashManager    │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Commands
//!
//! - `PING`
//! - `GET <key> <n> [NAME=x]`
//! - `SET <key> <value> <n> [NAME=x] [TTL=ms]`
//! - `DELETE <key> <n> [NAME=x]`
//! - `EXPIRE <key> <ms> <n> [NAME=x]`
//! - `CREATE <name> <n> [OFF_HEAP=bool] [MAX_KEYS=k] [SNAPSHOTS=bool]`
//! - `DROP <name>`
//! - `INFO <n> [NAME=x]`
//! - `STATS`

pub mod handler;
pub mod parse;

pub use handler::CommandEngine;
pub use parse::{Command, CommandError, CommandKind, CommandSpec, CommandTable, ParseOutcome};
