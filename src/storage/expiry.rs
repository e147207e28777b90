//! Background Expiry Sweeper
//!
//! Lazy expiry only removes a key when somebody reads it. A key that
//! expires and is never read again would sit in memory forever, so this
//! task asks the writer to sweep every stash on a fixed interval
//! ("active expiry").
//!
//! The sweep itself runs on the writer task, never here, so it is
//! serialized with client writes like any other mutation.

use crate::writer::WriterHandle;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Starts the sweeper as a background task.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let (writer, _task) = spawn_writer(engine);
    /// let sweeper = ExpirySweeper::start(writer.clone(), Duration::from_secs(1));
    ///
    /// // Dropping the sweeper will stop it
    /// drop(sweeper);
    /// ```
    pub fn start(writer: WriterHandle, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(writer, interval, shutdown_rx));

        info!(
            interval_ms = interval.as_millis() as u64,
            "Background expiry sweeper started"
        );

        Self { shutdown_tx }
    }

    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    writer: WriterHandle,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        match writer.sweep().await {
            Ok(0) => {}
            Ok(expired) => debug!(expired, "Expired keys cleaned up"),
            Err(e) => {
                warn!(error = %e, "Expiry sweeper stopping");
                return;
            }
        }
    }
}
