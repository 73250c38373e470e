//! Error types for the POP3 protocol library.

use thiserror::Error;

/// Errors raised by POP3 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name rejected by the TLS stack.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// `-ERR` status from the server; carries the server's text.
    #[error("server refused command: {0}")]
    Err(String),

    /// Server output that does not match the protocol grammar.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Result alias for POP3 operations.
pub type Result<T> = std::result::Result<T, Error>;
