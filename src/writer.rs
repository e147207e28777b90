//! Writer: the single task that mutates stashes.
//!
//! Every read-write connection hands its token queue to the writer and
//! waits for it to come back with the responses. The periodic expiry sweep
//! goes through the same channel. Writes from all connections are
//! therefore applied one at a time in the order the writer receives them,
//! and each connection's own commands keep their arrival order.
//!
//! ```text
//!  conn A ─┐                              ┌─► (tokens, responses) ─► conn A
//!  conn B ─┼─► mpsc (bounded) ─► Writer ──┼─► (tokens, responses) ─► conn B
//!  sweeper ┘        CommandEngine::handle └─► expired count       ─► sweeper
//! ```
//!
//! The channel is bounded; when the writer falls behind, senders wait
//! instead of queueing without limit.

use crate::commands::CommandEngine;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the writer's request channel.
pub const WRITER_CHANNEL_CAPACITY: usize = 1024;

/// A connection's queue after the writer ran it, with any responses.
pub type ExecuteReply = (VecDeque<Bytes>, Option<Bytes>);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WriterError {
    /// The writer task has stopped (channel closed).
    #[error("writer unavailable")]
    Unavailable,
}

/// Work for the writer task.
#[derive(Debug)]
pub enum WriterMessage {
    /// Run every complete command in `tokens`
    Execute {
        tokens: VecDeque<Bytes>,
        reply: oneshot::Sender<ExecuteReply>,
    },
    /// Run one active-expiry pass over every stash
    Sweep { reply: oneshot::Sender<usize> },
}

/// A cloneable handle for sending work to the writer.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterMessage>,
}

impl WriterHandle {
    /// Runs a connection's pending commands on the writer.
    pub async fn execute(&self, tokens: VecDeque<Bytes>) -> Result<ExecuteReply, WriterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterMessage::Execute { tokens, reply })
            .await
            .map_err(|_| WriterError::Unavailable)?;
        rx.await.map_err(|_| WriterError::Unavailable)
    }

    /// Runs an expiry sweep. Returns the number of keys removed.
    pub async fn sweep(&self) -> Result<usize, WriterError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriterMessage::Sweep { reply })
            .await
            .map_err(|_| WriterError::Unavailable)?;
        rx.await.map_err(|_| WriterError::Unavailable)
    }
}

/// Spawns the writer task. It exits once every handle has been dropped.
pub fn spawn_writer(engine: Arc<CommandEngine>) -> (WriterHandle, JoinHandle<()>) {
    spawn_writer_with_capacity(engine, WRITER_CHANNEL_CAPACITY)
}

pub fn spawn_writer_with_capacity(
    engine: Arc<CommandEngine>,
    capacity: usize,
) -> (WriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_writer(engine, rx));
    (WriterHandle { tx }, task)
}

async fn run_writer(engine: Arc<CommandEngine>, mut rx: mpsc::Receiver<WriterMessage>) {
    info!("Writer started");
    while let Some(msg) = rx.recv().await {
        match msg {
            WriterMessage::Execute { mut tokens, reply } => {
                let out = engine.handle(&mut tokens, false);
                // the connection may have gone away while waiting
                let _ = reply.send((tokens, out));
            }
            WriterMessage::Sweep { reply } => {
                let expired = engine.manager().expire_ttl_keys();
                if expired > 0 {
                    engine.stats().keys_expired(expired);
                    debug!(expired, "Writer swept expired keys");
                }
                let _ = reply.send(expired);
            }
        }
    }
    info!("Writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Limits, StashDefaults};
    use crate::protocol::encode_tokens;
    use crate::stats::ServerStats;
    use crate::storage::StashManager;
    use std::time::Duration;

    fn engine() -> Arc<CommandEngine> {
        let manager = Arc::new(StashManager::new(8, StashDefaults::default()));
        Arc::new(CommandEngine::new(
            manager,
            Limits::default(),
            Arc::new(ServerStats::new()),
        ))
    }

    fn queue(tokens: &[&str]) -> VecDeque<Bytes> {
        tokens
            .iter()
            .map(|t| Bytes::from(t.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_execute_returns_queue_and_output() {
        let (writer, _task) = spawn_writer(engine());

        let (rest, out) = writer
            .execute(queue(&["SET", "k", "v", "0", "GET", "k"]))
            .await
            .unwrap();
        assert_eq!(out, Some(encode_tokens(&["OK"])));
        // the incomplete GET comes back untouched
        assert_eq!(rest, queue(&["GET", "k"]));
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let engine = engine();
        let (writer, _task) = spawn_writer(Arc::clone(&engine));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("k{i}");
                writer
                    .execute(queue(&["SET", &key, "v", "0"]))
                    .await
                    .unwrap()
            }));
        }
        for t in tasks {
            let (_, out) = t.await.unwrap();
            assert_eq!(out, Some(encode_tokens(&["OK"])));
        }
        assert_eq!(engine.manager().total_keys(), 20);
    }

    #[tokio::test]
    async fn test_sweep() {
        let engine = engine();
        let (writer, _task) = spawn_writer(Arc::clone(&engine));

        writer
            .execute(queue(&["SET", "k", "v", "1", "TTL=500"]))
            .await
            .unwrap();
        writer
            .execute(queue(&["SET", "keep", "v", "0"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(writer.sweep().await.unwrap(), 1);
        assert_eq!(engine.manager().total_keys(), 1);
    }

    #[tokio::test]
    async fn test_writer_stops_when_handles_drop() {
        let (writer, task) = spawn_writer(engine());
        drop(writer);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("writer exits")
            .unwrap();
    }
}
