//! StashKV server binary.
//!
//! Parses flags (with `STASHKV_*` environment fallbacks), sets up logging,
//! then binds and runs the server until Ctrl-C.

use clap::Parser;
use stashkv::config::{Limits, ServerConfig, StashDefaults, DEFAULT_HOST, DEFAULT_PORT};
use stashkv::server::Server;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// In-memory key-value server with named stashes.
#[derive(Parser, Debug)]
#[command(name = "stashkv", version, about)]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "STASHKV_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// Port for read-write connections
    #[arg(short, long, env = "STASHKV_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Port for read-only connections (disabled when unset)
    #[arg(long, env = "STASHKV_READ_ONLY_PORT")]
    read_only_port: Option<u16>,

    /// Maximum number of stashes, the default one included
    #[arg(long, env = "STASHKV_MAX_STASHES", default_value_t = 64)]
    max_stashes: usize,

    /// Key limit for stashes created without MAX_KEYS
    #[arg(long, env = "STASHKV_DEFAULT_MAX_KEYS", default_value_t = 1_000_000)]
    default_max_keys: usize,

    /// Take snapshots of stashes created without SNAPSHOTS
    #[arg(long, env = "STASHKV_DEFAULT_SNAPSHOTS")]
    default_snapshots: bool,

    /// Directory for snapshot files (enables persistence)
    #[arg(long, env = "STASHKV_SNAPSHOT_DIR")]
    snapshot_dir: Option<PathBuf>,

    /// Seconds between snapshot passes
    #[arg(long, env = "STASHKV_SNAPSHOT_INTERVAL", default_value_t = 60)]
    snapshot_interval: u64,

    /// Milliseconds between expiry sweeps
    #[arg(long, env = "STASHKV_SWEEP_INTERVAL_MS", default_value_t = 1000)]
    sweep_interval_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "STASHKV_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: self.port,
            read_only_port: self.read_only_port,
            max_stashes: self.max_stashes,
            stash_defaults: StashDefaults {
                max_key_count: self.default_max_keys.max(1),
                snapshots: self.default_snapshots,
            },
            limits: Limits::default(),
            snapshot_dir: self.snapshot_dir,
            snapshot_interval: Duration::from_secs(self.snapshot_interval.max(1)),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(1)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = args.into_config();
    info!(
        version = stashkv::VERSION,
        addr = %config.bind_address(),
        read_only = config.read_only_address().as_deref().unwrap_or("disabled"),
        max_stashes = config.max_stashes,
        "Starting StashKV"
    );

    let server = Server::bind(config).await?;
    info!("Ready to accept connections. Use Ctrl+C to shutdown gracefully.");
    server.run().await;

    Ok(())
}
