//! Server Configuration
//!
//! Everything tunable about a StashKV server lives in [`ServerConfig`]. The
//! binary builds one from command-line flags (with `STASHKV_*` environment
//! fallbacks); tests build one with struct-update syntax over
//! [`ServerConfig::default`].

use std::path::PathBuf;
use std::time::Duration;

/// Name of the stash every server starts with. It can never be dropped.
pub const DEFAULT_STASH: &str = "default";

/// Default port for read-write connections.
pub const DEFAULT_PORT: u16 = 7070;

/// Default host to bind to.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Size limits applied to every token the server accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum key length in bytes
    pub max_key_len: usize,
    /// Maximum value length in bytes
    pub max_value_len: usize,
    /// Maximum stash name length in bytes
    pub max_name_len: usize,
    /// Largest TTL accepted on the wire, in milliseconds
    pub max_ttl_ms: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_key_len: 256,
            max_value_len: 64 * 1024,
            max_name_len: 64,
            max_ttl_ms: 365 * 24 * 60 * 60 * 1_000,
        }
    }
}

impl Limits {
    /// The largest number of bytes a connection may hold unparsed.
    ///
    /// Three maximal key+value pairs: one command almost fully delivered
    /// followed by the start of a second maximal command.
    pub fn max_buffered_bytes(&self) -> usize {
        3 * (self.max_key_len + self.max_value_len)
    }

    /// The largest single token the framer will accept.
    ///
    /// Anything that fits in the buffer frames, so oversize keys, values and
    /// names reach the command layer and get a non-fatal `*_TOO_LONG` error.
    /// Only a token that could never fit is refused up front.
    pub fn max_token_len(&self) -> usize {
        self.max_buffered_bytes()
    }
}

/// Defaults used for stashes created without explicit options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StashDefaults {
    /// Key limit for new stashes
    pub max_key_count: usize,
    /// Whether new stashes take periodic snapshots
    pub snapshots: bool,
}

impl Default for StashDefaults {
    fn default() -> Self {
        Self {
            max_key_count: 1_000_000,
            snapshots: false,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind both listeners to
    pub host: String,
    /// Port for read-write connections
    pub port: u16,
    /// Port for read-only connections (None disables the listener)
    pub read_only_port: Option<u16>,
    /// Maximum number of stashes, including the default one
    pub max_stashes: usize,
    /// Defaults for new stashes
    pub stash_defaults: StashDefaults,
    /// Token size limits
    pub limits: Limits,
    /// Directory for snapshot files (None disables persistence)
    pub snapshot_dir: Option<PathBuf>,
    /// How often dirty stashes are written to disk
    pub snapshot_interval: Duration,
    /// How often the TTL sweep runs
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            read_only_port: None,
            max_stashes: 64,
            stash_defaults: StashDefaults::default(),
            limits: Limits::default(),
            snapshot_dir: None,
            snapshot_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Returns the read-write bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the read-only bind address, if that listener is enabled
    pub fn read_only_address(&self) -> Option<String> {
        self.read_only_port
            .map(|port| format!("{}:{}", self.host, port))
    }
}
