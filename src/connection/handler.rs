//! Connection Handler Module
//!
//! Each client gets its own handler task that runs in a loop, reading
//! bytes, turning them into tokens and sending back responses.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects (TCP handshake)
//!        │
//!        ▼
//! 2. ConnectionHandler spawned (ReadWrite or ReadOnly)
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────────┐
//!    │      Main Loop                       │
//!    │                                      │
//!    │  Read bytes from socket              │
//!    │        │                             │
//!    │        ▼                             │
//!    │  Framer: bytes → token queue         │
//!    │        │          (FrameError →      │
//!    │        │           FATAL, close)     │
//!    │        ▼                             │
//!    │  ReadWrite: queue → writer task      │
//!    │  ReadOnly:  queue → CommandEngine    │
//!    │        │                             │
//!    │        ▼                             │
//!    │  Send responses                      │
//!    │        │                             │
//!    │        ▼                             │
//!    │   [Loop back]                        │
//!    └──────────────────────────────────────┘
//!        │
//!        ▼
//! 4. Client disconnects / error
//! ```
//!
//! Tokens of a command that hasn't fully arrived stay in the connection's
//! queue between reads.

use crate::commands::CommandEngine;
use crate::protocol::{FrameError, Framer, Response};
use crate::stats::ServerStats;
use crate::writer::{WriterError, WriterHandle};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Read buffer capacity
const READ_BUFFER_SIZE: usize = 4096;

/// How a connection's commands get executed.
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Commands run on the writer task
    ReadWrite(WriterHandle),
    /// Commands run on the connection's own task; writes are refused
    ReadOnly(Arc<CommandEngine>),
}

impl ConnectionMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, ConnectionMode::ReadOnly(_))
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Scratch buffer for socket reads
    read_buf: BytesMut,

    framer: Framer,

    /// Complete tokens not yet consumed by a command
    tokens: VecDeque<Bytes>,

    mode: ConnectionMode,

    /// Server statistics (shared)
    stats: Arc<ServerStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        framer: Framer,
        mode: ConnectionMode,
        stats: Arc<ServerStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            framer,
            tokens: VecDeque::new(),
            mode,
            stats,
        }
    }

    /// Runs the connection until the client leaves or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(
            client = %self.addr,
            read_only = self.mode.is_read_only(),
            "Client connected"
        );

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::Io(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.read_more_data().await?;

            let framed = self
                .framer
                .feed(&self.read_buf)
                .and_then(|()| self.framer.drain_into(&mut self.tokens));
            self.read_buf.clear();

            if let Err(e) = framed {
                warn!(client = %self.addr, error = %e, "Protocol error, closing connection");
                self.send(Response::fatal(&e).serialize()).await?;
                return Err(ConnectionError::Protocol(e));
            }

            if let Some(out) = self.dispatch().await? {
                self.send(out).await?;
            }
        }
    }

    /// Runs whatever complete commands are queued.
    async fn dispatch(&mut self) -> Result<Option<Bytes>, ConnectionError> {
        if self.tokens.is_empty() {
            return Ok(None);
        }

        match &self.mode {
            ConnectionMode::ReadOnly(engine) => Ok(engine.handle(&mut self.tokens, true)),
            ConnectionMode::ReadWrite(writer) => {
                let pending = std::mem::take(&mut self.tokens);
                let (rest, out) = writer.execute(pending).await?;
                self.tokens = rest;
                Ok(out)
            }
        }
    }

    /// Reads more data from the socket.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        let n = self.stream.get_mut().read_buf(&mut self.read_buf).await?;

        if n == 0 {
            if self.framer.buffered() == 0 && self.tokens.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            }
            return Err(ConnectionError::UnexpectedEof);
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");
        Ok(())
    }

    /// Sends encoded response frames to the client.
    async fn send(&mut self, bytes: Bytes) -> Result<(), ConnectionError> {
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(
            client = %self.addr,
            bytes = bytes.len(),
            "Sent response"
        );
        Ok(())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed framing; the client was sent a fatal response
    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// The writer task is gone (server shutting down)
    #[error("writer unavailable")]
    WriterUnavailable(#[from] WriterError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Handles a client connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    framer: Framer,
    mode: ConnectionMode,
    stats: Arc<ServerStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, framer, mode, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::Io(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Limits, StashDefaults, DEFAULT_STASH};
    use crate::protocol::encode_tokens;
    use crate::storage::{ExpirySweeper, StashManager};
    use crate::writer::spawn_writer;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::net::TcpListener;

    struct TestServer {
        rw: SocketAddr,
        ro: SocketAddr,
        manager: Arc<StashManager>,
        stats: Arc<ServerStats>,
        _sweeper: ExpirySweeper,
    }

    async fn accept_loop(listener: TcpListener, mode: ConnectionMode, stats: Arc<ServerStats>) {
        while let Ok((stream, client_addr)) = listener.accept().await {
            let framer = Framer::new(&Limits::default());
            tokio::spawn(handle_connection(
                stream,
                client_addr,
                framer,
                mode.clone(),
                Arc::clone(&stats),
            ));
        }
    }

    async fn create_test_server() -> TestServer {
        let manager = Arc::new(StashManager::new(16, StashDefaults::default()));
        let stats = Arc::new(ServerStats::new());
        let engine = Arc::new(CommandEngine::new(
            Arc::clone(&manager),
            Limits::default(),
            Arc::clone(&stats),
        ));
        let (writer, _task) = spawn_writer(Arc::clone(&engine));
        let sweeper = ExpirySweeper::start(writer.clone(), Duration::from_millis(100));

        let rw_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ro_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rw = rw_listener.local_addr().unwrap();
        let ro = ro_listener.local_addr().unwrap();

        tokio::spawn(accept_loop(
            rw_listener,
            ConnectionMode::ReadWrite(writer),
            Arc::clone(&stats),
        ));
        tokio::spawn(accept_loop(
            ro_listener,
            ConnectionMode::ReadOnly(engine),
            Arc::clone(&stats),
        ));

        TestServer {
            rw,
            ro,
            manager,
            stats,
            _sweeper: sweeper,
        }
    }

    /// Splits a client's incoming bytes into response frames.
    struct FrameReader {
        framer: Framer,
        frames: VecDeque<Bytes>,
    }

    impl FrameReader {
        fn new() -> Self {
            Self {
                framer: Framer::new(&Limits::default()),
                frames: VecDeque::new(),
            }
        }

        async fn next(&mut self, client: &mut TcpStream) -> Bytes {
            let mut buf = [0u8; 1024];
            loop {
                self.framer.drain_into(&mut self.frames).unwrap();
                if let Some(frame) = self.frames.pop_front() {
                    return frame;
                }
                let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
                    .await
                    .expect("response in time")
                    .unwrap();
                assert!(n > 0, "server closed the connection");
                self.framer.feed(&buf[..n]).unwrap();
            }
        }
    }

    async fn request(client: &mut TcpStream, tokens: &[&str]) -> Bytes {
        client.write_all(&encode_tokens(tokens)).await.unwrap();
        FrameReader::new().next(client).await
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        client.write_all(b"4\r\nPING").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"4\r\nPONG");
    }

    #[tokio::test]
    async fn test_set_get() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        assert_eq!(
            request(&mut client, &["SET", "burger", "cheese", "0"]).await,
            Bytes::from("OK")
        );
        assert_eq!(
            request(&mut client, &["GET", "burger", "0"]).await,
            Bytes::from("cheese")
        );
    }

    #[tokio::test]
    async fn test_stash_lifecycle() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        assert_eq!(request(&mut client, &["CREATE", "shop", "0"]).await, "OK");
        assert_eq!(
            request(&mut client, &["SET", "item", "fries", "1", "NAME=shop"]).await,
            "OK"
        );
        assert_eq!(
            request(&mut client, &["GET", "item", "1", "NAME=shop"]).await,
            "fries"
        );
        assert_eq!(request(&mut client, &["DROP", "shop"]).await, "OK");
        assert_eq!(
            request(&mut client, &["GET", "item", "1", "NAME=shop"]).await,
            "ERROR STASH_DOESNT_EXIST"
        );
    }

    #[tokio::test]
    async fn test_ttl_expires_via_sweep() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        assert_eq!(
            request(&mut client, &["SET", "k", "v", "1", "TTL=500"]).await,
            "OK"
        );
        assert_eq!(request(&mut client, &["GET", "k", "0"]).await, "v");

        tokio::time::sleep(Duration::from_millis(1_300)).await;

        // gone before anyone reads it
        assert_eq!(server.manager.total_keys(), 0);
        assert_eq!(request(&mut client, &["GET", "k", "0"]).await, "*NULL");
    }

    #[tokio::test]
    async fn test_pipelined_responses() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        let wire = encode_tokens(&[
            "SET", "k1", "v1", "0", "SET", "k2", "v2", "0", "GET", "k1", "0", "GET", "k2", "0",
        ]);
        client.write_all(&wire).await.unwrap();

        let mut reader = FrameReader::new();
        let mut responses = Vec::new();
        for _ in 0..4 {
            responses.push(reader.next(&mut client).await);
        }
        assert_eq!(responses, vec!["OK", "OK", "v1", "v2"]);
    }

    #[tokio::test]
    async fn test_byte_at_a_time() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        let wire = encode_tokens(&["SET", "slow", "drip", "1", "NAME=default"]);
        for byte in wire.iter() {
            client.write_all(&[*byte]).await.unwrap();
            client.flush().await.unwrap();
        }

        assert_eq!(FrameReader::new().next(&mut client).await, "OK");
        assert_eq!(request(&mut client, &["GET", "slow", "0"]).await, "drip");
    }

    #[tokio::test]
    async fn test_malformed_length_is_fatal() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        client.write_all(b"abc\r\nPING").await.unwrap();
        let frame = FrameReader::new().next(&mut client).await;
        assert!(frame.starts_with(b"FATAL "));

        // then the server hangs up
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_zero_length_is_fatal() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        client.write_all(b"0\r\n").await.unwrap();
        let frame = FrameReader::new().next(&mut client).await;
        assert!(frame.starts_with(b"FATAL "));
    }

    #[tokio::test]
    async fn test_oversize_value_keeps_connection() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        let value = "v".repeat(Limits::default().max_value_len + 1);
        assert_eq!(
            request(&mut client, &["SET", "k", &value, "0"]).await,
            "ERROR VALUE_TOO_LONG"
        );
        let key = "k".repeat(Limits::default().max_key_len + 1);
        assert_eq!(
            request(&mut client, &["GET", &key, "0"]).await,
            "ERROR KEY_TOO_LONG"
        );

        assert_eq!(request(&mut client, &["PING"]).await, "PONG");
        assert_eq!(request(&mut client, &["GET", "k", "0"]).await, "*NULL");
    }

    #[tokio::test]
    async fn test_read_only_connection() {
        let server = create_test_server().await;
        let mut rw = TcpStream::connect(server.rw).await.unwrap();
        let mut ro = TcpStream::connect(server.ro).await.unwrap();

        assert_eq!(request(&mut rw, &["SET", "k", "v", "0"]).await, "OK");

        assert_eq!(
            request(&mut ro, &["SET", "k", "changed", "0"]).await,
            "ERROR READ_ONLY_MODE"
        );
        assert_eq!(
            request(&mut ro, &["DELETE", "k", "0"]).await,
            "ERROR READ_ONLY_MODE"
        );
        assert_eq!(
            request(&mut ro, &["CREATE", "shop", "0"]).await,
            "ERROR READ_ONLY_MODE"
        );
        assert_eq!(
            request(&mut ro, &["DROP", "default"]).await,
            "ERROR READ_ONLY_MODE"
        );

        assert_eq!(request(&mut ro, &["GET", "k", "0"]).await, "v");
        assert_eq!(request(&mut ro, &["PING"]).await, "PONG");
        let stash = server.manager.get_stash(DEFAULT_STASH).unwrap();
        assert_eq!(stash.len().unwrap(), 1);
        assert!(!server.manager.contains_stash("shop"));
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let server = create_test_server().await;
        let mut client = TcpStream::connect(server.rw).await.unwrap();

        request(&mut client, &["CREATE", "a", "0"]).await;
        request(&mut client, &["CREATE", "b", "0"]).await;
        request(&mut client, &["SET", "k", "A", "1", "NAME=a"]).await;
        request(&mut client, &["SET", "k", "B", "1", "NAME=b"]).await;

        assert_eq!(request(&mut client, &["GET", "k", "1", "NAME=a"]).await, "A");
        assert_eq!(request(&mut client, &["GET", "k", "1", "NAME=b"]).await, "B");
        assert_eq!(request(&mut client, &["GET", "k", "0"]).await, "*NULL");
    }

    #[tokio::test]
    async fn test_default_survives_concurrent_drops() {
        let server = create_test_server().await;

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let addr = server.rw;
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                for _ in 0..10 {
                    let reply = request(&mut client, &["DROP", "default"]).await;
                    assert_eq!(reply, "ERROR CANNOT_DROP_DEFAULT");
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(server.manager.contains_stash(DEFAULT_STASH));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let server = create_test_server().await;
        let stats = &server.stats;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);

        let mut client = TcpStream::connect(server.rw).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);

        request(&mut client, &["PING"]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);
        assert!(stats.bytes_read.load(Ordering::Relaxed) > 0);
        assert!(stats.bytes_written.load(Ordering::Relaxed) > 0);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
