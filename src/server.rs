//! TCP server: wires the stash manager, writer, background tasks and
//! listeners together.
//!
//! Startup order:
//!
//! 1. restore snapshots (when a snapshot directory is configured)
//! 2. bind the read-write listener and, optionally, the read-only one
//! 3. on [`Server::run`]: spawn the writer, the expiry sweeper and the
//!    snapshot scheduler, then accept until shutdown
//!
//! On shutdown the server stops accepting, stops the sweeper, takes a
//! final snapshot of dirty stashes and drops its writer handle. The writer
//! exits once the last connection holding a handle goes away.

use crate::commands::CommandEngine;
use crate::config::{Limits, ServerConfig};
use crate::connection::{handle_connection, ConnectionMode};
use crate::persistence::{FormatError, SnapshotScheduler, SnapshotStore};
use crate::protocol::Framer;
use crate::stats::ServerStats;
use crate::storage::{ExpirySweeper, StashManager};
use crate::writer::spawn_writer;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to restore snapshots: {0}")]
    Restore(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound, not yet running, server.
pub struct Server {
    config: ServerConfig,
    manager: Arc<StashManager>,
    stats: Arc<ServerStats>,
    store: Option<Arc<SnapshotStore>>,
    listener: TcpListener,
    read_only_listener: Option<TcpListener>,
}

impl Server {
    /// Restores persisted stashes and binds the listeners.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let store = config
            .snapshot_dir
            .as_ref()
            .map(|dir| Arc::new(SnapshotStore::new(dir)));

        let manager = match &store {
            Some(store) => {
                std::fs::create_dir_all(store.dir())?;
                let manager = StashManager::with_snapshots(
                    config.max_stashes,
                    config.stash_defaults,
                    Arc::clone(store),
                );
                let loaded = store.load_all()?;
                let restored = manager.restore(loaded);
                info!(
                    dir = %store.dir().display(),
                    restored,
                    "Snapshots restored"
                );
                manager
            }
            None => StashManager::new(config.max_stashes, config.stash_defaults),
        };

        let listener = bind(&config.bind_address()).await?;
        let read_only_listener = match config.read_only_address() {
            Some(addr) => Some(bind(&addr).await?),
            None => None,
        };

        Ok(Self {
            config,
            manager: Arc::new(manager),
            stats: Arc::new(ServerStats::new()),
            store,
            listener,
            read_only_listener,
        })
    }

    /// Address of the read-write listener.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address of the read-only listener, if enabled.
    pub fn read_only_addr(&self) -> Option<SocketAddr> {
        self.read_only_listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    pub fn manager(&self) -> &Arc<StashManager> {
        &self.manager
    }

    pub fn stats(&self) -> &Arc<ServerStats> {
        &self.stats
    }

    /// Runs until Ctrl-C.
    pub async fn run(self) {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received, stopping server...");
        })
        .await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) {
        let Server {
            config,
            manager,
            stats,
            store,
            listener,
            read_only_listener,
        } = self;

        let engine = Arc::new(CommandEngine::new(
            Arc::clone(&manager),
            config.limits,
            Arc::clone(&stats),
        ));
        let (writer, _writer_task) = spawn_writer(Arc::clone(&engine));
        let sweeper = ExpirySweeper::start(writer.clone(), config.sweep_interval);
        let scheduler = store.map(|store| {
            SnapshotScheduler::start(Arc::clone(&manager), store, config.snapshot_interval)
        });

        let read_write = accept_loop(
            listener,
            ConnectionMode::ReadWrite(writer),
            config.limits,
            Arc::clone(&stats),
        );
        let read_only = async {
            match read_only_listener {
                Some(listener) => {
                    accept_loop(
                        listener,
                        ConnectionMode::ReadOnly(engine),
                        config.limits,
                        Arc::clone(&stats),
                    )
                    .await
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = read_write => {}
            _ = read_only => {}
            _ = shutdown => {}
        }

        drop(sweeper);
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
        info!("Server shutdown complete");
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    info!(addr = %addr, "Listening");
    Ok(listener)
}

/// Accepts connections forever, one task per client.
async fn accept_loop(
    listener: TcpListener,
    mode: ConnectionMode,
    limits: Limits,
    stats: Arc<ServerStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let _ = stream.set_nodelay(true);
                let framer = Framer::new(&limits);
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    framer,
                    mode.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
