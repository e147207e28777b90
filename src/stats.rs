//! Server-wide counters reported by `STATS`.

use crate::storage::StashManager;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by every connection, the writer and the sweeper.
#[derive(Debug)]
pub struct ServerStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Commands executed, errors included
    pub commands_processed: AtomicU64,
    /// Commands answered with an `ERROR` frame
    pub command_errors: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
    /// Keys removed by the active expiry sweep
    pub keys_expired: AtomicU64,
    started: Instant,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            connections_accepted: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
            command_errors: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            keys_expired: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.command_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn keys_expired(&self, count: usize) {
        self.keys_expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Renders the counters plus keyspace figures as `STATS` text.
    pub fn render(&self, manager: &StashManager) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "# Server\r\n\
             stashkv_version:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Clients\r\n\
             connections_accepted:{}\r\n\
             active_connections:{}\r\n\
             \r\n\
             # Stats\r\n\
             commands_processed:{}\r\n\
             command_errors:{}\r\n\
             bytes_read:{}\r\n\
             bytes_written:{}\r\n\
             keys_expired:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             stashes:{}\r\n\
             max_stashes:{}\r\n\
             keys:{}\r\n",
            crate::VERSION,
            self.started.elapsed().as_secs(),
            self.connections_accepted.load(Ordering::Relaxed),
            self.active_connections.load(Ordering::Relaxed),
            self.commands_processed.load(Ordering::Relaxed),
            self.command_errors.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.keys_expired.load(Ordering::Relaxed),
            manager.stash_count(),
            manager.max_stashes(),
            manager.total_keys(),
        );
        out
    }
}
