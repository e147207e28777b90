//! Command Engine
//!
//! Drains complete commands from a connection's token queue, runs them
//! against the [`StashManager`] and returns the encoded responses.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       CommandEngine                         │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │  lookup()   │───>│   parse()   │───>│  execute()  │      │
//! │  └─────────────┘    └─────────────┘    └─────────────┘      │
//! │                                               │             │
//! │                                               ▼             │
//! │                                        StashManager         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A read-write connection only ever reaches the engine through the writer
//! task, so every mutation happens on one task. Read-only connections call
//! the engine directly; the parser turns their writes into
//! `READ_ONLY_MODE` before anything executes.

use crate::commands::parse::{
    parse, Command, CommandError, CommandTable, CreateOptions, ParseOutcome,
};
use crate::config::{Limits, DEFAULT_STASH};
use crate::protocol::Response;
use crate::stats::ServerStats;
use crate::storage::{Stash, StashManager, StashOptions};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

/// Runs commands against the stash registry.
#[derive(Debug)]
pub struct CommandEngine {
    manager: Arc<StashManager>,
    table: CommandTable,
    limits: Limits,
    stats: Arc<ServerStats>,
}

impl CommandEngine {
    /// Creates an engine with the built-in command table.
    pub fn new(manager: Arc<StashManager>, limits: Limits, stats: Arc<ServerStats>) -> Self {
        Self::with_table(manager, CommandTable::standard(), limits, stats)
    }

    pub fn with_table(
        manager: Arc<StashManager>,
        table: CommandTable,
        limits: Limits,
        stats: Arc<ServerStats>,
    ) -> Self {
        Self {
            manager,
            table,
            limits,
            stats,
        }
    }

    pub fn manager(&self) -> &Arc<StashManager> {
        &self.manager
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Executes every complete command at the front of `tokens`.
    ///
    /// Unknown command names are skipped one token at a time. Processing
    /// stops at the first command that hasn't fully arrived; its tokens stay
    /// queued. Returns the concatenated response frames, or `None` if no
    /// command ran.
    pub fn handle(&self, tokens: &mut VecDeque<Bytes>, read_only: bool) -> Option<Bytes> {
        let mut out = BytesMut::new();
        let mut executed = false;

        while let Some(name) = tokens.front() {
            let Some(spec) = self.table.lookup(name) else {
                trace!(token = ?name, "Skipping unknown command token");
                tokens.pop_front();
                continue;
            };

            let response = match parse(spec, tokens, read_only, &self.limits) {
                ParseOutcome::Incomplete => break,
                ParseOutcome::Invalid { consumed, error } => {
                    tokens.drain(..consumed);
                    debug!(command = spec.name, %error, "Rejected command");
                    Response::error(error)
                }
                ParseOutcome::Parsed { command, consumed } => {
                    tokens.drain(..consumed);
                    self.execute(command, read_only)
                }
            };

            self.stats.command_processed();
            if response.is_error() {
                self.stats.command_failed();
            }
            response.serialize_into(&mut out);
            executed = true;
        }

        executed.then(|| out.freeze())
    }

    /// Runs one parsed command.
    pub fn execute(&self, command: Command, read_only: bool) -> Response {
        match self.run(command, read_only) {
            Ok(response) => response,
            Err(e) => Response::error(e),
        }
    }

    fn run(&self, command: Command, read_only: bool) -> Result<Response, CommandError> {
        match command {
            Command::Ping => Ok(Response::Pong),

            Command::Get { key, stash } => {
                let stash = self.resolve(stash.as_deref())?;
                match stash.get(&key, read_only)? {
                    Some(value) => Ok(Response::Value(value)),
                    None => Ok(Response::Null),
                }
            }

            Command::Set {
                key,
                value,
                ttl_ms,
                stash,
            } => {
                let stash = self.resolve(stash.as_deref())?;
                match ttl_ms {
                    Some(ttl_ms) => stash.set_with_ttl(key, value, ttl_ms)?,
                    None => stash.set(key, value)?,
                }
                Ok(Response::Ok)
            }

            Command::Delete { key, stash } => {
                self.resolve(stash.as_deref())?.delete(&key)?;
                Ok(Response::Ok)
            }

            Command::Expire {
                key,
                ttl_ms,
                stash,
            } => {
                let stash = self.resolve(stash.as_deref())?;
                if stash.update_ttl(&key, ttl_ms)? {
                    Ok(Response::Ok)
                } else {
                    Err(CommandError::KeyNotFound)
                }
            }

            Command::Create { name, options } => {
                let options = self.stash_options(options);
                self.manager.create_stash(&name, options)?;
                Ok(Response::Ok)
            }

            Command::Drop { name } => {
                self.manager.drop_stash(&name)?;
                Ok(Response::Ok)
            }

            Command::Info { stash } => {
                let stash = self.resolve(stash.as_deref())?;
                Ok(Response::Text(stash.info()?))
            }

            Command::Stats => Ok(Response::Text(self.stats.render(&self.manager))),
        }
    }

    /// Looks up the target stash, `default` when no name was given.
    fn resolve(&self, name: Option<&str>) -> Result<Arc<Stash>, CommandError> {
        self.manager
            .get_stash(name.unwrap_or(DEFAULT_STASH))
            .ok_or(CommandError::StashNotFound)
    }

    fn stash_options(&self, requested: CreateOptions) -> StashOptions {
        let defaults = self.manager.default_options();
        StashOptions {
            max_key_count: requested.max_keys.unwrap_or(defaults.max_key_count),
            snapshots: requested.snapshots.unwrap_or(defaults.snapshots),
            off_heap: requested.off_heap.unwrap_or(defaults.off_heap),
        }
    }
}
