//! POP3 transport: TCP/TLS streams and line framing.
//!
//! POP3 is purely line-oriented. Single-line replies start with `+OK` or
//! `-ERR`; multi-line replies end with a line containing only `.`, and any
//! content line starting with `.` arrives byte-stuffed as `..`.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf,
};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::{Error, Result};

const READ_BUFFER_SIZE: usize = 8192;

/// Cap on a single reply line.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Cap on a multi-line payload (a RETR of a pathological message).
const MAX_MULTILINE_SIZE: usize = 100 * 1024 * 1024;

/// A connection that is either plaintext or TLS.
pub enum Pop3Stream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP (boxed to keep the enum small).
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for Pop3Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Pop3Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Self::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Connects with TLS from the first byte (POP3S, usually port 995).
pub async fn connect_tls(host: &str, port: u16) -> Result<Pop3Stream> {
    let tcp = TcpStream::connect((host, port)).await?;

    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let server_name = ServerName::try_from(host.to_string())?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(Pop3Stream::Tls(Box::new(tls)))
}

/// Connects without TLS (usually port 110).
pub async fn connect_plain(host: &str, port: u16) -> Result<Pop3Stream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(Pop3Stream::Plain(tcp))
}

/// A parsed single-line status reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// True for `+OK`, false for `-ERR`.
    pub ok: bool,
    /// Text after the status word.
    pub text: String,
}

impl StatusLine {
    /// Converts `-ERR` into [`Error::Err`], passing `+OK` text through.
    pub fn into_result(self) -> Result<String> {
        if self.ok {
            Ok(self.text)
        } else {
            Err(Error::Err(self.text))
        }
    }
}

/// Buffered POP3 transport.
pub struct Pop3Wire<S> {
    reader: BufReader<S>,
    bytes_received: u64,
}

impl<S> Pop3Wire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a stream in the framing layer.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, stream),
            bytes_received: 0,
        }
    }

    /// Total bytes read from the server on this connection.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Sends one CRLF-terminated command line.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads and parses one status line.
    pub async fn read_status(&mut self) -> Result<StatusLine> {
        let line = self.read_line().await?;
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches(['\r', '\n']);

        if let Some(rest) = text.strip_prefix("+OK") {
            Ok(StatusLine {
                ok: true,
                text: rest.trim_start().to_string(),
            })
        } else if let Some(rest) = text.strip_prefix("-ERR") {
            Ok(StatusLine {
                ok: false,
                text: rest.trim_start().to_string(),
            })
        } else {
            Err(Error::Protocol(format!("malformed status line: {text}")))
        }
    }

    /// Reads a multi-line payload through the `.` terminator, with
    /// dot-stuffing undone. The terminator itself is not included.
    ///
    /// Calls `on_block` with the cumulative received byte count per line,
    /// which is what large RETR transfers report as progress.
    pub async fn read_multiline(&mut self, mut on_block: impl FnMut(u64)) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        loop {
            let line = self.read_line().await?;
            on_block(self.bytes_received);

            if line == b".\r\n" || line == b".\n" {
                break;
            }
            if let Some(stuffed) = line.strip_prefix(b"..") {
                payload.push(b'.');
                payload.extend_from_slice(stuffed);
            } else {
                payload.extend_from_slice(&line);
            }
            if payload.len() > MAX_MULTILINE_SIZE {
                return Err(Error::Protocol("multi-line reply too large".to_string()));
            }
        }
        Ok(payload)
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

            if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&buf[..=pos]);
                self.reader.consume(pos + 1);
                self.bytes_received += (pos + 1) as u64;
                break;
            }

            let len = buf.len();
            line.extend_from_slice(buf);
            self.reader.consume(len);
            self.bytes_received += len as u64;

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("reply line too long".to_string()));
            }
        }
        Ok(line)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn parses_ok_and_err_status() {
        let mock = Builder::new()
            .read(b"+OK 2 messages\r\n")
            .read(b"-ERR no such message\r\n")
            .build();
        let mut wire = Pop3Wire::new(mock);

        let ok = wire.read_status().await.unwrap();
        assert!(ok.ok);
        assert_eq!(ok.text, "2 messages");

        let err = wire.read_status().await.unwrap();
        assert!(!err.ok);
        assert!(err.into_result().is_err());
    }

    #[tokio::test]
    async fn multiline_unstuffs_dots() {
        let mock = Builder::new()
            .read(b"line one\r\n")
            .read(b"..starts with dot\r\n")
            .read(b".\r\n")
            .build();
        let mut wire = Pop3Wire::new(mock);
        let payload = wire.read_multiline(|_| {}).await.unwrap();
        assert_eq!(payload, b"line one\r\n.starts with dot\r\n");
    }

    #[tokio::test]
    async fn malformed_status_is_an_error() {
        let mock = Builder::new().read(b"HELLO\r\n").build();
        let mut wire = Pop3Wire::new(mock);
        assert!(wire.read_status().await.is_err());
    }

    #[tokio::test]
    async fn counts_received_bytes() {
        let mock = Builder::new().read(b"+OK\r\n").build();
        let mut wire = Pop3Wire::new(mock);
        wire.read_status().await.unwrap();
        assert_eq!(wire.bytes_received(), 5);
    }
}
