//! Response Types
//!
//! Every reply the server sends is a single frame, `<len>\r\n<payload>`.
//! The payload is one of a handful of fixed words or the raw bytes of a
//! stored value:
//!
//! - `OK` success
//! - `PONG` reply to `PING`
//! - `*NULL` missing value
//! - `ERROR <CODE>` recoverable command error, the connection stays open
//! - `FATAL <reason>` protocol error, the server closes the connection
//! - anything else is a value (or `INFO`/`STATS` text)
//!
//! A stored value that happens to equal one of the fixed words is
//! indistinguishable from it on the wire.

use crate::protocol::framer::encode_token;
use bytes::{Bytes, BytesMut};
use std::fmt;

/// Payload for a successful write.
pub const OK: &[u8] = b"OK";

/// Payload answering `PING`.
pub const PONG: &[u8] = b"PONG";

/// Payload for a missing key.
pub const NULL: &[u8] = b"*NULL";

/// Prefix of a recoverable error payload.
pub const ERROR_PREFIX: &str = "ERROR ";

/// Prefix of a fatal error payload.
pub const FATAL_PREFIX: &str = "FATAL ";

/// A reply to a single command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `OK`
    Ok,
    /// `PONG`
    Pong,
    /// `*NULL`
    Null,
    /// Raw value bytes
    Value(Bytes),
    /// Human-readable text (INFO, STATS)
    Text(String),
    /// `ERROR <code>`
    Error(String),
    /// `FATAL <reason>`; the connection is closed after sending it
    Fatal(String),
}

impl Response {
    /// Creates a value response.
    pub fn value(data: impl Into<Bytes>) -> Self {
        Response::Value(data.into())
    }

    /// Creates an error response from anything displayable.
    pub fn error(err: impl fmt::Display) -> Self {
        Response::Error(err.to_string())
    }

    /// Creates a fatal response from anything displayable.
    pub fn fatal(err: impl fmt::Display) -> Self {
        Response::Fatal(err.to_string())
    }

    /// Serializes the response as one frame.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.serialize_into(&mut buf);
        buf.freeze()
    }

    /// Serializes the response into an existing buffer.
    pub fn serialize_into(&self, buf: &mut BytesMut) {
        match self {
            Response::Ok => encode_token(buf, OK),
            Response::Pong => encode_token(buf, PONG),
            Response::Null => encode_token(buf, NULL),
            Response::Value(data) => encode_token(buf, data),
            Response::Text(text) => encode_token(buf, text.as_bytes()),
            Response::Error(code) => {
                encode_token(buf, format!("{ERROR_PREFIX}{code}").as_bytes())
            }
            Response::Fatal(reason) => {
                encode_token(buf, format!("{FATAL_PREFIX}{reason}").as_bytes())
            }
        }
    }

    /// Interprets a decoded frame payload.
    ///
    /// Used by clients; text and values cannot be told apart, so both
    /// come back as [`Response::Value`].
    pub fn from_payload(payload: Bytes) -> Self {
        match &payload[..] {
            OK => Response::Ok,
            PONG => Response::Pong,
            NULL => Response::Null,
            bytes => {
                if let Some(code) = bytes.strip_prefix(ERROR_PREFIX.as_bytes()) {
                    Response::Error(String::from_utf8_lossy(code).into_owned())
                } else if let Some(reason) = bytes.strip_prefix(FATAL_PREFIX.as_bytes()) {
                    Response::Fatal(String::from_utf8_lossy(reason).into_owned())
                } else {
                    Response::Value(payload)
                }
            }
        }
    }

    /// Returns true if this is an `ERROR` or `FATAL` response.
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_) | Response::Fatal(_))
    }

    /// Returns true if the connection must be closed after this response.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Response::Fatal(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Ok => write!(f, "OK"),
            Response::Pong => write!(f, "PONG"),
            Response::Null => write!(f, "(nil)"),
            Response::Value(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Response::Text(text) => write!(f, "{}", text),
            Response::Error(code) => write!(f, "(error) {}", code),
            Response::Fatal(reason) => write!(f, "(fatal) {}", reason),
        }
    }
}
