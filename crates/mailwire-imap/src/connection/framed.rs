//! CRLF/literal framing.
//!
//! IMAP responses are CRLF-terminated lines that may end in a `{n}` literal
//! marker, after which exactly `n` raw bytes follow before line mode
//! resumes. [`WireStream::read_block`] coalesces a line and all of its
//! embedded literals into one block so the parser never sees a split
//! response. Treating literals as ordinary lines corrupts any value that
//! happens to contain CRLF bytes.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 8192;

/// Cap on a single response line.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Cap on a single literal.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024;

/// Buffered IMAP transport with literal-aware framing.
pub struct WireStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
    bytes_received: u64,
}

impl<S> WireStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream in the framing layer.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            bytes_received: 0,
        }
    }

    /// Total bytes read from the server on this connection.
    ///
    /// Monotonic across the connection's lifetime; progress reporting for
    /// large fetches samples this between blocks.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Reads one complete response block: a line plus any literals it
    /// announces, repeated until a line ends without a literal marker.
    pub async fn read_block(&mut self) -> Result<Vec<u8>> {
        let mut block = Vec::new();

        loop {
            let line = self.read_line().await?;
            block.extend_from_slice(&line);

            let Some(len) = trailing_literal_length(&line) else {
                break;
            };
            if len > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {len} bytes"
                )));
            }
            let mut literal = vec![0u8; len];
            self.reader.read_exact(&mut literal).await?;
            self.bytes_received += len as u64;
            block.extend_from_slice(&literal);
            // Loop: the rest of the logical line follows the literal.
        }

        Ok(block)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();

        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            if let Some(pos) = find_crlf(buf) {
                line.extend_from_slice(&buf[..pos + 2]);
                self.reader.consume(pos + 2);
                self.bytes_received += (pos + 2) as u64;
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);
            self.bytes_received += len as u64;

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("response line too long".to_string()));
            }
        }

        Ok(line)
    }

    /// Sends one serialized command line.
    pub async fn send_line(&mut self, data: &[u8]) -> Result<()> {
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Sends raw bytes with no framing (APPEND literal payloads).
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Consumes the framing layer, returning the inner stream. Buffered
    /// read data is discarded, so call this only at a protocol boundary
    /// (post-STARTTLS acceptance).
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Returns the byte count of a `{n}` or `{n+}` marker ending the line.
fn trailing_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    let digits = std::str::from_utf8(&line[open + 1..]).ok()?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn literal_marker_detection() {
        assert_eq!(trailing_literal_length(b"* LIST () \"/\" {12}\r\n"), Some(12));
        assert_eq!(trailing_literal_length(b"a {0}\r\n"), Some(0));
        assert_eq!(trailing_literal_length(b"a {7+}\r\n"), Some(7));
        assert_eq!(trailing_literal_length(b"no marker\r\n"), None);
        assert_eq!(trailing_literal_length(b"bad {x}\r\n"), None);
        assert_eq!(trailing_literal_length(b"unterminated {5"), None);
    }

    #[tokio::test]
    async fn reads_simple_line() {
        let mock = Builder::new().read(b"* OK ready\r\n").build();
        let mut wire = WireStream::new(mock);
        assert_eq!(wire.read_block().await.unwrap(), b"* OK ready\r\n");
        assert_eq!(wire.bytes_received(), 12);
    }

    #[tokio::test]
    async fn coalesces_literal_into_block() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[1] {5}\r\n")
            .read(b"he\r\no)\r\n")
            .build();
        let mut wire = WireStream::new(mock);
        let block = wire.read_block().await.unwrap();
        // The literal's embedded CRLF does not end the block.
        assert_eq!(block, b"* 1 FETCH (BODY[1] {5}\r\nhe\r\no)\r\n");
    }

    #[tokio::test]
    async fn coalesces_chained_literals() {
        let mock = Builder::new()
            .read(b"* LIST () {1}\r\n")
            .read(b"/ {5}\r\n")
            .read(b"A/B C\r\n")
            .build();
        let mut wire = WireStream::new(mock);
        let block = wire.read_block().await.unwrap();
        assert_eq!(block, b"* LIST () {1}\r\n/ {5}\r\nA/B C\r\n");
    }

    #[tokio::test]
    async fn oversized_literal_is_rejected() {
        let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut wire = WireStream::new(mock);
        assert!(wire.read_block().await.is_err());
    }

    #[tokio::test]
    async fn overlong_line_is_rejected() {
        let long = "x".repeat(MAX_LINE_LENGTH + 16);
        let mock = Builder::new().read(long.as_bytes()).build();
        let mut wire = WireStream::new(mock);
        assert!(wire.read_block().await.is_err());
    }

    #[tokio::test]
    async fn sends_line_then_raw() {
        let mock = Builder::new()
            .write(b"A0 APPEND INBOX {3}\r\n")
            .write(b"abc")
            .build();
        let mut wire = WireStream::new(mock);
        wire.send_line(b"A0 APPEND INBOX {3}\r\n").await.unwrap();
        wire.send_raw(b"abc").await.unwrap();
    }
}
