//! Command Grammar
//!
//! Turns the front of a connection's token queue into a [`Command`].
//!
//! Every command is its name, a fixed number of positional tokens and,
//! for most commands, an optional-argument block:
//!
//! ```text
//!  SET   burger   cheese   2   NAME=shop   TTL=30000
//!  ─┬─   ──┬───   ──┬───   ┬   ──────┬──────────
//!  name  positional         │   N tokens of KEY=VALUE
//!                           └── N
//! ```
//!
//! `N` is capped at [`MAX_OPTIONAL_ARGS`]. No command declares more than
//! three option names, and the cap keeps a client from announcing a huge
//! count and making the connection buffer tokens while it waits for them.
//! A larger count is `INVALID_ARG_COUNT`, not `Incomplete`.
//!
//! Parsing only looks at the queue. The caller removes `consumed` tokens
//! after a `Parsed` or `Invalid` outcome; `Incomplete` leaves the queue
//! exactly as it was so the same command can be retried once more bytes
//! arrive.

use crate::config::Limits;
use crate::storage::{ManagerError, StashError};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

/// Largest optional-argument count accepted. Repeated keys are allowed
/// (the last one wins), so this bounds tokens, not distinct options.
pub const MAX_OPTIONAL_ARGS: usize = 16;

/// Non-fatal command failures. Each displays as its wire code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("READ_ONLY_MODE")]
    ReadOnlyMode,

    #[error("STASH_DOESNT_EXIST")]
    StashNotFound,

    #[error("DB_CLOSED")]
    Closed,

    #[error("KEY_TOO_LONG")]
    KeyTooLong,

    #[error("VALUE_TOO_LONG")]
    ValueTooLong,

    #[error("NAME_TOO_LONG")]
    NameTooLong,

    #[error("INVALID_NAME")]
    InvalidName,

    #[error("INVALID_TTL")]
    InvalidTtl,

    #[error("INVALID_BOOLEAN")]
    InvalidBoolean,

    #[error("INVALID_MAX_KEYS")]
    InvalidMaxKeys,

    #[error("INVALID_ARG_COUNT")]
    InvalidArgCount,

    #[error("MALFORMED_ARGUMENT")]
    MalformedArgument,

    #[error("UNKNOWN_ARGUMENT")]
    UnknownArgument,

    #[error("KEY_DOESNT_EXIST")]
    KeyNotFound,

    #[error("STASH_LIMIT_REACHED")]
    StashLimitReached,

    #[error("CANNOT_DROP_DEFAULT")]
    CannotDropDefault,
}

impl From<StashError> for CommandError {
    fn from(err: StashError) -> Self {
        match err {
            StashError::Closed => CommandError::Closed,
        }
    }
}

impl From<ManagerError> for CommandError {
    fn from(err: ManagerError) -> Self {
        match err {
            ManagerError::LimitReached => CommandError::StashLimitReached,
            ManagerError::CannotDropDefault => CommandError::CannotDropDefault,
            ManagerError::NotFound => CommandError::StashNotFound,
        }
    }
}

/// The commands the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Ping,
    Get,
    Set,
    Delete,
    Expire,
    Create,
    Drop,
    Info,
    Stats,
}

/// The static shape of one command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub name: &'static str,
    pub kind: CommandKind,
    /// Tokens between the name and the optional-argument count
    pub positional: usize,
    /// Whether the command ends with an optional-argument block
    pub has_options: bool,
    /// Recognized optional argument keys
    pub options: &'static [&'static str],
    /// Whether the command mutates state
    pub write: bool,
}

impl CommandSpec {
    /// Fewest tokens that can make up this command.
    pub fn min_tokens(&self) -> usize {
        1 + self.positional + usize::from(self.has_options)
    }
}

const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "PING",
        kind: CommandKind::Ping,
        positional: 0,
        has_options: false,
        options: &[],
        write: false,
    },
    CommandSpec {
        name: "GET",
        kind: CommandKind::Get,
        positional: 1,
        has_options: true,
        options: &["NAME"],
        write: false,
    },
    CommandSpec {
        name: "SET",
        kind: CommandKind::Set,
        positional: 2,
        has_options: true,
        options: &["NAME", "TTL"],
        write: true,
    },
    CommandSpec {
        name: "DELETE",
        kind: CommandKind::Delete,
        positional: 1,
        has_options: true,
        options: &["NAME"],
        write: true,
    },
    CommandSpec {
        name: "EXPIRE",
        kind: CommandKind::Expire,
        positional: 2,
        has_options: true,
        options: &["NAME"],
        write: true,
    },
    CommandSpec {
        name: "CREATE",
        kind: CommandKind::Create,
        positional: 1,
        has_options: true,
        options: &["OFF_HEAP", "MAX_KEYS", "SNAPSHOTS"],
        write: true,
    },
    CommandSpec {
        name: "DROP",
        kind: CommandKind::Drop,
        positional: 1,
        has_options: false,
        options: &[],
        write: true,
    },
    CommandSpec {
        name: "INFO",
        kind: CommandKind::Info,
        positional: 0,
        has_options: true,
        options: &["NAME"],
        write: false,
    },
    CommandSpec {
        name: "STATS",
        kind: CommandKind::Stats,
        positional: 0,
        has_options: false,
        options: &[],
        write: false,
    },
];

/// Name → command lookup, built once and handed to the engine.
#[derive(Debug, Clone)]
pub struct CommandTable {
    specs: HashMap<&'static [u8], CommandSpec>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandTable {
    /// Every built-in command.
    pub fn standard() -> Self {
        Self {
            specs: COMMANDS.iter().map(|c| (c.name.as_bytes(), *c)).collect(),
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn lookup(&self, name: &[u8]) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

/// `CREATE` settings given explicitly by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub off_heap: Option<bool>,
    pub max_keys: Option<usize>,
    pub snapshots: Option<bool>,
}

/// A fully validated command.
///
/// `stash` is the `NAME=` argument; `None` means the default stash.
/// TTLs are in milliseconds, as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Get {
        key: Bytes,
        stash: Option<String>,
    },
    Set {
        key: Bytes,
        value: Bytes,
        ttl_ms: Option<u64>,
        stash: Option<String>,
    },
    Delete {
        key: Bytes,
        stash: Option<String>,
    },
    Expire {
        key: Bytes,
        ttl_ms: u64,
        stash: Option<String>,
    },
    Create {
        name: String,
        options: CreateOptions,
    },
    Drop {
        name: String,
    },
    Info {
        stash: Option<String>,
    },
    Stats,
}

/// Result of looking at the front of the token queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not all of the command's tokens have arrived yet
    Incomplete,
    /// The command is complete but unusable
    Invalid {
        consumed: usize,
        error: CommandError,
    },
    Parsed {
        command: Command,
        consumed: usize,
    },
}

/// Parses the command at the front of `tokens`, whose first token names
/// `spec`.
pub fn parse(
    spec: &CommandSpec,
    tokens: &VecDeque<Bytes>,
    read_only: bool,
    limits: &Limits,
) -> ParseOutcome {
    if tokens.len() < spec.min_tokens() {
        return ParseOutcome::Incomplete;
    }

    let count_index = 1 + spec.positional;
    let option_count = if spec.has_options {
        match parse_count(&tokens[count_index]) {
            Some(n) => n,
            None => {
                return ParseOutcome::Invalid {
                    consumed: count_index + 1,
                    error: CommandError::InvalidArgCount,
                }
            }
        }
    } else {
        0
    };

    let consumed = spec.min_tokens() + option_count;
    if tokens.len() < consumed {
        return ParseOutcome::Incomplete;
    }

    if read_only && spec.write {
        return ParseOutcome::Invalid {
            consumed,
            error: CommandError::ReadOnlyMode,
        };
    }

    let positional: Vec<&Bytes> = tokens.range(1..count_index).collect();
    let optional: Vec<&Bytes> = tokens.range(spec.min_tokens()..consumed).collect();

    match build(spec, &positional, &optional, limits) {
        Ok(command) => ParseOutcome::Parsed { command, consumed },
        Err(error) => ParseOutcome::Invalid { consumed, error },
    }
}

fn build(
    spec: &CommandSpec,
    positional: &[&Bytes],
    optional: &[&Bytes],
    limits: &Limits,
) -> Result<Command, CommandError> {
    let args = OptionalArgs::parse(spec, optional)?;

    let command = match spec.kind {
        CommandKind::Ping => Command::Ping,
        CommandKind::Stats => Command::Stats,
        CommandKind::Get => Command::Get {
            key: key_arg(positional[0], limits)?,
            stash: args.stash(limits)?,
        },
        CommandKind::Set => {
            let key = key_arg(positional[0], limits)?;
            let value = positional[1];
            if value.len() > limits.max_value_len {
                return Err(CommandError::ValueTooLong);
            }
            Command::Set {
                key,
                value: value.clone(),
                ttl_ms: args.get("TTL").map(|v| parse_ttl(v, limits)).transpose()?,
                stash: args.stash(limits)?,
            }
        }
        CommandKind::Delete => Command::Delete {
            key: key_arg(positional[0], limits)?,
            stash: args.stash(limits)?,
        },
        CommandKind::Expire => Command::Expire {
            key: key_arg(positional[0], limits)?,
            ttl_ms: parse_ttl(positional[1], limits)?,
            stash: args.stash(limits)?,
        },
        CommandKind::Create => Command::Create {
            name: name_arg(positional[0], limits)?,
            options: CreateOptions {
                off_heap: args.get("OFF_HEAP").map(parse_bool).transpose()?,
                max_keys: args.get("MAX_KEYS").map(parse_max_keys).transpose()?,
                snapshots: args.get("SNAPSHOTS").map(parse_bool).transpose()?,
            },
        },
        CommandKind::Drop => Command::Drop {
            name: name_arg(positional[0], limits)?,
        },
        CommandKind::Info => Command::Info {
            stash: args.stash(limits)?,
        },
    };
    Ok(command)
}

/// Parsed `KEY=VALUE` tokens. Later duplicates win.
struct OptionalArgs<'a> {
    values: Vec<(&'static str, &'a [u8])>,
}

impl<'a> OptionalArgs<'a> {
    fn parse(spec: &CommandSpec, tokens: &[&'a Bytes]) -> Result<Self, CommandError> {
        let mut values: Vec<(&'static str, &'a [u8])> = Vec::with_capacity(tokens.len());
        for &token in tokens {
            let token: &'a [u8] = token.as_ref();
            let eq = token
                .iter()
                .position(|&b| b == b'=')
                .ok_or(CommandError::MalformedArgument)?;
            let (key, value) = (&token[..eq], &token[eq + 1..]);
            if key.is_empty() || value.is_empty() {
                return Err(CommandError::MalformedArgument);
            }
            let known: &'static str = *spec
                .options
                .iter()
                .find(|name| name.as_bytes() == key)
                .ok_or(CommandError::UnknownArgument)?;

            values.retain(|(k, _)| *k != known);
            values.push((known, value));
        }
        Ok(Self { values })
    }

    fn get(&self, key: &str) -> Option<&'a [u8]> {
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    fn stash(&self, limits: &Limits) -> Result<Option<String>, CommandError> {
        self.get("NAME").map(|v| name_arg(v, limits)).transpose()
    }
}

fn parse_count(token: &[u8]) -> Option<usize> {
    let n: usize = std::str::from_utf8(token).ok()?.parse().ok()?;
    (n <= MAX_OPTIONAL_ARGS).then_some(n)
}

fn key_arg(token: &Bytes, limits: &Limits) -> Result<Bytes, CommandError> {
    if token.len() > limits.max_key_len {
        return Err(CommandError::KeyTooLong);
    }
    Ok(token.clone())
}

fn name_arg(token: &[u8], limits: &Limits) -> Result<String, CommandError> {
    if token.len() > limits.max_name_len {
        return Err(CommandError::NameTooLong);
    }
    std::str::from_utf8(token)
        .map(str::to_string)
        .map_err(|_| CommandError::InvalidName)
}

fn parse_ttl(token: &[u8], limits: &Limits) -> Result<u64, CommandError> {
    let ttl_ms: u64 = std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidTtl)?;
    if ttl_ms == 0 || ttl_ms > limits.max_ttl_ms {
        return Err(CommandError::InvalidTtl);
    }
    Ok(ttl_ms)
}

fn parse_bool(token: &[u8]) -> Result<bool, CommandError> {
    if token.eq_ignore_ascii_case(b"true") {
        Ok(true)
    } else if token.eq_ignore_ascii_case(b"false") {
        Ok(false)
    } else {
        Err(CommandError::InvalidBoolean)
    }
}

fn parse_max_keys(token: &[u8]) -> Result<usize, CommandError> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .ok_or(CommandError::InvalidMaxKeys)
}
