//! Connection Handler Module
//!
//! Each accepted client is handled by its own async task.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  read-write listener     │      │  read-only listener      │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │ accept()                        │ accept()
//!              ▼                                 ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │ ConnectionHandler        │      │ ConnectionHandler        │
//! │  Framer → token queue    │      │  Framer → token queue    │
//! │  mode: ReadWrite(writer) │      │  mode: ReadOnly(engine)  │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              │ WriterHandle::execute           │ CommandEngine::handle
//!              ▼                                 ▼
//!        Writer task ─────────► StashManager ◄───┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let framer = Framer::new(&config.limits);
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(
//!     stream,
//!     addr,
//!     framer,
//!     ConnectionMode::ReadWrite(writer.clone()),
//!     Arc::clone(&stats),
//! ));
//! ```

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionMode};
