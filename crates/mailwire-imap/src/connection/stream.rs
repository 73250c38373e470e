//! Plaintext and TLS stream variants.

#![allow(clippy::missing_errors_doc)]

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use crate::{Error, Result};

/// A connection that is either plaintext or TLS.
///
/// Starts plaintext when the server expects STARTTLS; [`Self::upgrade`]
/// performs the in-place handshake after the server accepts the command.
pub enum ImapStream {
    /// Plaintext TCP.
    Plain(TcpStream),
    /// TLS over TCP (boxed to keep the enum small).
    Tls(Box<TlsStream<TcpStream>>),
}

impl ImapStream {
    /// Returns true if the transport is encrypted.
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Upgrades a plaintext stream to TLS after a STARTTLS acceptance.
    pub async fn upgrade(self, host: &str) -> Result<Self> {
        match self {
            Self::Plain(tcp) => {
                let connector = tls_connector();
                let server_name = ServerName::try_from(host.to_string())?;
                let tls = connector.connect(server_name, tcp).await?;
                Ok(Self::Tls(Box::new(tls)))
            }
            Self::Tls(_) => Err(Error::State("stream is already TLS".to_string())),
        }
    }
}

impl AsyncRead for ImapStream {
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

impl AsyncWrite for ImapStream {
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

/// TLS connector backed by the bundled webpki roots.
#[must_use]
pub fn tls_connector() -> TlsConnector {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Connects with TLS from the first byte (implicit TLS, usually port 993).
pub async fn connect_tls(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    let connector = tls_connector();
    let server_name = ServerName::try_from(host.to_string())?;
    let tls = connector.connect(server_name, tcp).await?;
    Ok(ImapStream::Tls(Box::new(tls)))
}

/// Connects without TLS (cleartext or pre-STARTTLS, usually port 143).
pub async fn connect_plain(host: &str, port: u16) -> Result<ImapStream> {
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(ImapStream::Plain(tcp))
}
