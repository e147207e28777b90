//! Wire Protocol
//!
//! StashKV speaks a minimal length-prefixed protocol. Requests and
//! responses are both sequences of tokens, each one `<len>\r\n<bytes>`.
//! A request is a command name followed by its arguments; a response is
//! exactly one token.
//!
//! ## Modules
//!
//! - `framer`: incremental token extraction from partial TCP reads
//! - `types`: the `Response` enum and its encoding
//!
//! ## Example
//!
//! ```
//! use stashkv::protocol::{encode_tokens, Framer, Response};
//! use stashkv::config::Limits;
//!
//! let wire = encode_tokens(&["GET", "burger", "0"]);
//!
//! let mut framer = Framer::new(&Limits::default());
//! framer.feed(&wire).unwrap();
//! assert_eq!(framer.drain_tokens().unwrap().len(), 3);
//!
//! assert_eq!(&Response::Pong.serialize()[..], b"4\r\nPONG");
//! ```

pub mod framer;
pub mod types;

pub use framer::{encode_token, encode_tokens, FrameError, Framer, CRLF};
pub use types::Response;
