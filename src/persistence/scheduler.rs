//! Background Snapshot Scheduler
//!
//! Every `interval` the scheduler writes each stash whose dirty flag is set.
//! File I/O runs on the blocking pool so connection tasks never wait on the
//! disk. Stopping the scheduler runs one last pass, so a clean shutdown
//! loses nothing written before it.

use crate::persistence::SnapshotStore;
use crate::storage::StashManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle to the running snapshot task. Dropping it stops the task.
#[derive(Debug)]
pub struct SnapshotScheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotScheduler {
    /// Spawns the scheduler on the current runtime.
    pub fn start(manager: Arc<StashManager>, store: Arc<SnapshotStore>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler_loop(manager, store, interval, shutdown_rx));

        info!(
            interval_secs = interval.as_secs_f64(),
            "Snapshot scheduler started"
        );

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Stops the scheduler and waits for its final pass to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Snapshot scheduler stopped");
    }
}

impl Drop for SnapshotScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn scheduler_loop(
    manager: Arc<StashManager>,
    store: Arc<SnapshotStore>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Snapshot scheduler received shutdown signal");
                    run_pass(&manager, &store).await;
                    return;
                }
            }
        }
        run_pass(&manager, &store).await;
    }
}

async fn run_pass(manager: &Arc<StashManager>, store: &Arc<SnapshotStore>) {
    let manager = Arc::clone(manager);
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || snapshot_dirty(&manager, &store)).await {
        Ok(0) => {}
        Ok(written) => debug!(stashes = written, "Snapshot pass complete"),
        Err(e) => warn!(error = %e, "Snapshot task panicked"),
    }
}

/// Writes every dirty stash. Returns how many were written.
///
/// A stash whose write fails is marked dirty again for the next pass.
pub fn snapshot_dirty(manager: &StashManager, store: &SnapshotStore) -> usize {
    let mut written = 0;
    for stash in manager.all_stashes() {
        if !stash.take_dirty() {
            continue;
        }
        match store.save(&stash) {
            Ok(_) => written += 1,
            Err(e) => {
                warn!(stash = %stash.name(), error = %e, "Snapshot failed");
                stash.mark_dirty();
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StashDefaults;
    use crate::storage::StashOptions;
    use bytes::Bytes;

    fn setup() -> (tempfile::TempDir, Arc<SnapshotStore>, Arc<StashManager>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));
        let manager = Arc::new(StashManager::with_snapshots(
            8,
            StashDefaults::default(),
            Arc::clone(&store),
        ));
        manager
            .create_stash(
                "saved",
                StashOptions {
                    snapshots: true,
                    ..Default::default()
                },
            )
            .unwrap();
        manager
            .create_stash("volatile", StashOptions::default())
            .unwrap();
        (dir, store, manager)
    }

    #[test]
    fn test_only_dirty_snapshot_stashes_are_written() {
        let (_dir, store, manager) = setup();
        let saved = manager.get_stash("saved").unwrap();
        let volatile = manager.get_stash("volatile").unwrap();

        assert_eq!(snapshot_dirty(&manager, &store), 0);

        saved.set(Bytes::from("k"), Bytes::from("v")).unwrap();
        volatile.set(Bytes::from("k"), Bytes::from("v")).unwrap();
        assert_eq!(snapshot_dirty(&manager, &store), 1);
        assert!(store.path_for("saved").exists());
        assert!(!store.path_for("volatile").exists());

        // clean now
        assert_eq!(snapshot_dirty(&manager, &store), 0);
    }

    #[tokio::test]
    async fn test_shutdown_runs_final_pass() {
        let (_dir, store, manager) = setup();
        let scheduler = SnapshotScheduler::start(
            Arc::clone(&manager),
            Arc::clone(&store),
            Duration::from_secs(3600),
        );

        manager
            .get_stash("saved")
            .unwrap()
            .set(Bytes::from("item"), Bytes::from("fries"))
            .unwrap();
        scheduler.shutdown().await;

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "saved");
        assert_eq!(loaded[0].entries.len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_pass() {
        let (_dir, store, manager) = setup();
        let _scheduler = SnapshotScheduler::start(
            Arc::clone(&manager),
            Arc::clone(&store),
            Duration::from_millis(20),
        );

        manager
            .get_stash("saved")
            .unwrap()
            .set(Bytes::from("k"), Bytes::from("v"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(store.path_for("saved").exists());
    }
}
