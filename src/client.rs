//! Async client for a StashKV server.
//!
//! [`Client`] writes a command as a run of length-prefixed tokens and reads
//! back exactly one response frame, decoding it with the same [`Framer`]
//! the server uses. It is generic over the stream so tests can drive it
//! with a scripted mock.
//!
//! The helpers at the bottom turn a line typed into `stashkv-cli` into
//! wire tokens:
//!
//! ```text
//! set burger cheese ttl=30000   →   SET burger cheese 1 TTL=30000
//! get burger name=shop       →   GET burger 1 NAME=shop
//! ```

use crate::config::Limits;
use crate::protocol::{encode_token, FrameError, Framer, Response};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Errors that can occur while talking to a server.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] FrameError),

    #[error("server disconnected")]
    Disconnected,

    #[error("unexpected response: {0}")]
    UnexpectedResponse(Response),

    /// A line couldn't be turned into a command
    #[error("{0}")]
    Usage(String),
}

/// A connection to a StashKV server.
#[derive(Debug)]
pub struct Client<S = TcpStream> {
    stream: S,
    framer: Framer,
    frames: VecDeque<Bytes>,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl Client<TcpStream> {
    /// Connects to a server's read-write or read-only port.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            framer: Framer::new(&Limits::default()),
            frames: VecDeque::new(),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
        }
    }

    /// Sends one command and waits for its response.
    pub async fn send<T: AsRef<[u8]>>(&mut self, tokens: &[T]) -> Result<Response, ClientError> {
        self.write_buf.clear();
        for token in tokens {
            encode_token(&mut self.write_buf, token.as_ref());
        }
        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.read_response().await
    }

    /// Sends `PING` and checks for `PONG`.
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        match self.send(&["PING"]).await? {
            Response::Pong => Ok(()),
            other => Err(ClientError::UnexpectedResponse(other)),
        }
    }

    /// Reads the next response frame.
    pub async fn read_response(&mut self) -> Result<Response, ClientError> {
        loop {
            if let Some(payload) = self.frames.pop_front() {
                return Ok(Response::from_payload(payload));
            }

            let n = self.stream.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
            self.framer.feed(&self.read_buf)?;
            self.read_buf.clear();
            self.framer.drain_into(&mut self.frames)?;
        }
    }

    /// Gives back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Splits a typed line into words. Double quotes group words and `\`
/// escapes the next character inside them.
pub fn tokenize(input: &str) -> Result<Vec<String>, ClientError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        None => return Err(ClientError::Usage("unmatched double quote".into())),
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => return Err(ClientError::Usage("trailing backslash".into())),
                        },
                        Some(c) => current.push(c),
                    }
                }
            }
            _ => {
                in_word = true;
                current.push(ch);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Translates CLI words into the tokens of one wire command.
///
/// Trailing `key=value` words become optional arguments with the key
/// upper-cased; the count token is filled in automatically.
pub fn command_tokens(words: &[String]) -> Result<Vec<String>, ClientError> {
    let (verb, rest) = words
        .split_first()
        .ok_or_else(|| ClientError::Usage("empty command".into()))?;

    let (name, positional, has_options, usage) = match verb.to_ascii_lowercase().as_str() {
        "ping" => ("PING", 0, false, "ping"),
        "get" => ("GET", 1, true, "get <key> [name=x]"),
        "set" => ("SET", 2, true, "set <key> <value> [name=x] [ttl=ms]"),
        "delete" => ("DELETE", 1, true, "delete <key> [name=x]"),
        "expire" => ("EXPIRE", 2, true, "expire <key> <ttl_ms> [name=x]"),
        "create" => (
            "CREATE",
            1,
            true,
            "create <name> [off_heap=b] [max_keys=k] [snapshots=b]",
        ),
        "drop" => ("DROP", 1, false, "drop <name>"),
        "info" => ("INFO", 0, true, "info [name=x]"),
        "stats" => ("STATS", 0, false, "stats"),
        other => return Err(ClientError::Usage(format!("unknown command '{other}'"))),
    };

    if rest.len() < positional {
        return Err(ClientError::Usage(format!("usage: {usage}")));
    }
    let (args, options) = rest.split_at(positional);
    if !has_options && !options.is_empty() {
        return Err(ClientError::Usage(format!("usage: {usage}")));
    }

    let mut tokens = Vec::with_capacity(2 + rest.len());
    tokens.push(name.to_string());
    tokens.extend(args.iter().cloned());
    if has_options {
        tokens.push(options.len().to_string());
        for option in options {
            let (key, value) = option
                .split_once('=')
                .ok_or_else(|| ClientError::Usage(format!("expected key=value, got '{option}'")))?;
            tokens.push(format!("{}={}", key.to_ascii_uppercase(), value));
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn words(line: &str) -> Vec<String> {
        tokenize(line).unwrap()
    }

    #[tokio::test]
    async fn test_send_and_decode() {
        let mock = Builder::new()
            .write(b"3\r\nGET6\r\nburger1\r\n0")
            .read(b"6\r\ncheese")
            .build();
        let mut client = Client::new(mock);

        let response = client.send(&["GET", "burger", "0"]).await.unwrap();
        assert_eq!(response, Response::value("cheese"));
    }

    #[tokio::test]
    async fn test_response_split_across_reads() {
        let mock = Builder::new()
            .write(b"4\r\nPING")
            .read(b"4\r")
            .read(b"\nPO")
            .read(b"NG")
            .build();
        let mut client = Client::new(mock);

        client.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read() {
        let mock = Builder::new()
            .write(b"4\r\nPING")
            .read(b"4\r\nPONG2\r\nOK")
            .write(b"5\r\nSTATS")
            .build();
        let mut client = Client::new(mock);

        assert_eq!(client.send(&["PING"]).await.unwrap(), Response::Pong);
        // the second frame was already buffered
        assert_eq!(client.send(&["STATS"]).await.unwrap(), Response::Ok);
    }

    #[tokio::test]
    async fn test_error_and_fatal_frames() {
        let mock = Builder::new()
            .write(b"3\r\nDEL")
            .read(b"21\r\nERROR UNKNOWN_COMMAND")
            .build();
        let mut client = Client::new(mock);
        assert_eq!(
            client.send(&["DEL"]).await.unwrap(),
            Response::Error("UNKNOWN_COMMAND".into())
        );

        let mock = Builder::new()
            .write(b"1\r\nx")
            .read(b"10\r\nFATAL oops")
            .build();
        let mut client = Client::new(mock);
        let response = client.send(&["x"]).await.unwrap();
        assert!(response.is_fatal());
    }

    #[tokio::test]
    async fn test_disconnected() {
        let mock = Builder::new().write(b"4\r\nPING").build();
        let mut client = Client::new(mock);

        assert!(matches!(
            client.send(&["PING"]).await,
            Err(ClientError::Disconnected)
        ));
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(words("set  k v"), vec!["set", "k", "v"]);
        assert_eq!(words("set k \"two words\""), vec!["set", "k", "two words"]);
        assert_eq!(words("set k \"say \\\"hi\\\"\""), vec!["set", "k", "say \"hi\""]);
        assert_eq!(words("set k \"\""), vec!["set", "k", ""]);
        assert!(words("   ").is_empty());
        assert!(tokenize("set k \"open").is_err());
    }

    #[test]
    fn test_command_tokens() {
        assert_eq!(command_tokens(&words("ping")).unwrap(), vec!["PING"]);
        assert_eq!(
            command_tokens(&words("get burger")).unwrap(),
            vec!["GET", "burger", "0"]
        );
        assert_eq!(
            command_tokens(&words("set burger cheese name=shop ttl=30000")).unwrap(),
            vec!["SET", "burger", "cheese", "2", "NAME=shop", "TTL=30000"]
        );
        assert_eq!(
            command_tokens(&words("expire burger 10")).unwrap(),
            vec!["EXPIRE", "burger", "10", "0"]
        );
        assert_eq!(
            command_tokens(&words("CREATE shop max_keys=10")).unwrap(),
            vec!["CREATE", "shop", "1", "MAX_KEYS=10"]
        );
        assert_eq!(command_tokens(&words("drop shop")).unwrap(), vec!["DROP", "shop"]);
        assert_eq!(command_tokens(&words("info")).unwrap(), vec!["INFO", "0"]);
        assert_eq!(command_tokens(&words("stats")).unwrap(), vec!["STATS"]);
    }

    #[test]
    fn test_command_tokens_usage_errors() {
        assert!(command_tokens(&[]).is_err());
        assert!(command_tokens(&words("get")).is_err());
        assert!(command_tokens(&words("set k")).is_err());
        assert!(command_tokens(&words("drop shop extra")).is_err());
        assert!(command_tokens(&words("get k shop")).is_err());
        assert!(command_tokens(&words("flush")).is_err());
    }
}
