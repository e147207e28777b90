//! Incremental Token Framer
//!
//! The wire format is a stream of length-prefixed tokens:
//!
//! ```text
//! <byte_count>\r\n<byte_count bytes><byte_count>\r\n<byte_count bytes>...
//! ```
//!
//! There is no terminator after the payload, so the only thing that marks
//! the end of a token is its declared length. TCP delivers the stream in
//! arbitrary chunks, so the framer keeps one growable buffer per connection:
//!
//! 1. [`Framer::feed`] appends whatever bytes arrived and enforces the
//!    buffer ceiling.
//! 2. [`Framer::drain_tokens`] pulls out every token whose bytes are fully
//!    present. A partial token stays buffered untouched until a later feed
//!    completes it.
//!
//! Consumed bytes are split off the front of the buffer and never parsed
//! again.

use crate::config::Limits;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;

/// The delimiter between a length prefix and its payload.
pub const CRLF: &[u8] = b"\r\n";

/// Longest length prefix we bother looking for a delimiter in.
const MAX_PREFIX_DIGITS: usize = 20;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Protocol errors. All of them are fatal to the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The length prefix is not a decimal number
    #[error("invalid length prefix: {0:?}")]
    InvalidLength(String),

    /// The length prefix declared zero bytes
    #[error("frame size must be at least 1")]
    EmptyFrame,

    /// The length prefix declared more bytes than the buffer can ever hold
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Too many unparsed bytes are buffered
    #[error("buffer overflow: {size} bytes buffered (max: {max})")]
    BufferOverflow { size: usize, max: usize },
}

/// Per-connection incremental token extractor.
#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    max_buffered: usize,
    max_token: usize,
}

impl Framer {
    /// Creates a framer sized for the given limits.
    pub fn new(limits: &Limits) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            max_buffered: limits.max_buffered_bytes(),
            max_token: limits.max_token_len(),
        }
    }

    /// Appends raw bytes from the transport.
    ///
    /// Fails once more than `3 × (max key + max value)` bytes sit in the
    /// buffer unparsed.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), FrameError> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > self.max_buffered {
            return Err(FrameError::BufferOverflow {
                size: self.buffer.len(),
                max: self.max_buffered,
            });
        }
        Ok(())
    }

    /// Extracts every complete token currently buffered.
    pub fn drain_tokens(&mut self) -> Result<Vec<Bytes>, FrameError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Extracts every complete token onto the back of a queue.
    ///
    /// Returns how many tokens were added.
    pub fn drain_into(&mut self, queue: &mut VecDeque<Bytes>) -> Result<usize, FrameError> {
        let mut count = 0;
        while let Some(token) = self.next_token()? {
            queue.push_back(token);
            count += 1;
        }
        Ok(count)
    }

    /// Number of bytes buffered but not yet turned into tokens.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// The unparsed bytes.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Parses one token off the front of the buffer.
    ///
    /// `Ok(None)` means the next token is not complete yet.
    fn next_token(&mut self) -> Result<Option<Bytes>, FrameError> {
        let prefix_end = match find_crlf(&self.buffer) {
            Some(pos) => pos,
            None => {
                // No delimiter yet. A prefix that is already too long for
                // any valid number will never become valid.
                if self.buffer.len() > MAX_PREFIX_DIGITS + 1 {
                    return Err(FrameError::InvalidLength(prefix_preview(
                        &self.buffer[..MAX_PREFIX_DIGITS],
                    )));
                }
                return Ok(None);
            }
        };

        let size = parse_size(&self.buffer[..prefix_end])?;
        if size < 1 {
            return Err(FrameError::EmptyFrame);
        }
        if size > self.max_token {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.max_token,
            });
        }

        let data_start = prefix_end + CRLF.len();
        if self.buffer.len() < data_start + size {
            return Ok(None);
        }

        self.buffer.advance(data_start);
        Ok(Some(self.buffer.split_to(size).freeze()))
    }
}

/// Parses a decimal, non-negative length prefix.
fn parse_size(prefix: &[u8]) -> Result<usize, FrameError> {
    if prefix.is_empty() || prefix.len() > MAX_PREFIX_DIGITS || !prefix.iter().all(u8::is_ascii_digit)
    {
        return Err(FrameError::InvalidLength(prefix_preview(prefix)));
    }
    std::str::from_utf8(prefix)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| FrameError::InvalidLength(prefix_preview(prefix)))
}

fn prefix_preview(prefix: &[u8]) -> String {
    String::from_utf8_lossy(prefix).into_owned()
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Appends one length-prefixed token to a buffer.
pub fn encode_token(buf: &mut BytesMut, token: &[u8]) {
    buf.reserve(token.len() + MAX_PREFIX_DIGITS + CRLF.len());
    buf.put_slice(token.len().to_string().as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(token);
}

/// Encodes a whole command (or any token sequence) as one byte string.
pub fn encode_tokens<T: AsRef<[u8]>>(tokens: &[T]) -> Bytes {
    let mut buf = BytesMut::new();
    for token in tokens {
        encode_token(&mut buf, token.as_ref());
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer() -> Framer {
        Framer::new(&Limits::default())
    }

    #[test]
    fn test_single_token() {
        let mut framer = framer();
        framer.feed(b"4\r\nPING").unwrap();
        assert_eq!(framer.drain_tokens().unwrap(), vec![Bytes::from("PING")]);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_multiple_tokens() {
        let mut framer = framer();
        framer.feed(b"3\r\nSET6\r\nburger6\r\ncheese1\r\n0").unwrap();
        assert_eq!(
            framer.drain_tokens().unwrap(),
            vec![
                Bytes::from("SET"),
                Bytes::from("burger"),
                Bytes::from("cheese"),
                Bytes::from("0"),
            ]
        );
    }

    #[test]
    fn test_partial_frame_is_kept() {
        let mut framer = framer();
        framer.feed(b"6\r\nche").unwrap();
        assert!(framer.drain_tokens().unwrap().is_empty());
        assert_eq!(framer.pending(), b"6\r\nche");

        framer.feed(b"ese").unwrap();
        assert_eq!(framer.drain_tokens().unwrap(), vec![Bytes::from("cheese")]);
    }

    #[test]
    fn test_partial_prefix_is_kept() {
        let mut framer = framer();
        framer.feed(b"1").unwrap();
        assert!(framer.drain_tokens().unwrap().is_empty());
        framer.feed(b"0\r\n0123456789").unwrap();
        assert_eq!(
            framer.drain_tokens().unwrap(),
            vec![Bytes::from("0123456789")]
        );
    }

    #[test]
    fn test_split_delimiter() {
        let mut framer = framer();
        framer.feed(b"2\r").unwrap();
        assert!(framer.drain_tokens().unwrap().is_empty());
        framer.feed(b"\nOK").unwrap();
        assert_eq!(framer.drain_tokens().unwrap(), vec![Bytes::from("OK")]);
    }

    #[test]
    fn test_arbitrary_chunking_preserves_tokens() {
        let tokens = ["SET", "item", "fries", "1", "NAME=shop", "GET", "item", "0"];
        let wire = encode_tokens(&tokens);

        for chunk_size in 1..=wire.len() {
            let mut framer = framer();
            let mut out = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                framer.feed(chunk).unwrap();
                out.extend(framer.drain_tokens().unwrap());
            }
            let out: Vec<&[u8]> = out.iter().map(|b| &b[..]).collect();
            let expected: Vec<&[u8]> = tokens.iter().map(|t| t.as_bytes()).collect();
            assert_eq!(out, expected, "chunk size {}", chunk_size);
            assert_eq!(framer.buffered(), 0);
        }
    }

    #[test]
    fn test_binary_payload_with_delimiter_inside() {
        let mut framer = framer();
        framer.feed(b"5\r\na\r\nbc").unwrap();
        assert_eq!(
            framer.drain_tokens().unwrap(),
            vec![Bytes::from(&b"a\r\nbc"[..])]
        );
    }

    #[test]
    fn test_zero_size_is_error() {
        let mut framer = framer();
        framer.feed(b"0\r\n").unwrap();
        assert_eq!(framer.drain_tokens(), Err(FrameError::EmptyFrame));
    }

    #[test]
    fn test_non_numeric_prefix_is_error() {
        let mut framer = framer();
        framer.feed(b"abc\r\nxyz").unwrap();
        assert!(matches!(
            framer.drain_tokens(),
            Err(FrameError::InvalidLength(_))
        ));

        let mut framer = self::framer();
        framer.feed(b"-1\r\nx").unwrap();
        assert!(matches!(
            framer.drain_tokens(),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_runaway_prefix_is_error() {
        let mut framer = framer();
        framer.feed(&[b'9'; 40]).unwrap();
        assert!(matches!(
            framer.drain_tokens(),
            Err(FrameError::InvalidLength(_))
        ));
    }

    #[test]
    fn test_oversized_frame_is_error() {
        let mut framer = framer();
        framer.feed(b"200000\r\n").unwrap();
        assert!(matches!(
            framer.drain_tokens(),
            Err(FrameError::FrameTooLarge { size: 200000, .. })
        ));
    }

    #[test]
    fn test_token_over_value_limit_still_frames() {
        let limits = Limits::default();
        let value = vec![b'v'; limits.max_value_len + 1];
        let wire = encode_tokens(&[&b"SET"[..], b"k", &value, b"0"]);

        let mut framer = Framer::new(&limits);
        let mut tokens = Vec::new();
        for chunk in wire.chunks(4096) {
            framer.feed(chunk).unwrap();
            tokens.extend(framer.drain_tokens().unwrap());
        }
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[2].len(), limits.max_value_len + 1);
        assert_eq!(framer.buffered(), 0);
    }

    #[test]
    fn test_buffer_overflow() {
        let limits = Limits::default();
        let mut framer = Framer::new(&limits);
        let chunk = vec![b'x'; limits.max_buffered_bytes()];
        framer.feed(&chunk).unwrap();
        assert!(matches!(
            framer.feed(b"x"),
            Err(FrameError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_drain_into_queue() {
        let mut framer = framer();
        let mut queue = VecDeque::new();
        queue.push_back(Bytes::from("GET"));
        framer.feed(b"1\r\nk1\r\n0").unwrap();
        assert_eq!(framer.drain_into(&mut queue).unwrap(), 2);
        assert_eq!(queue, vec![Bytes::from("GET"), Bytes::from("k"), Bytes::from("0")]);
    }

    #[test]
    fn test_encode_token() {
        let mut buf = BytesMut::new();
        encode_token(&mut buf, b"cheese");
        assert_eq!(&buf[..], b"6\r\ncheese");
    }
}
