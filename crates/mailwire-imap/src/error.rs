//! Error types for the IMAP protocol library.

use thiserror::Error;

/// Errors raised by IMAP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport-level failure (socket closed, timeout, DNS).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or record error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Host name rejected by the TLS stack.
    #[error("invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// Server output that does not match the response grammar.
    #[error("parse error at byte {position}: {message}")]
    Parse {
        /// Byte offset into the response block.
        position: usize,
        /// What was expected or found.
        message: String,
    },

    /// Tagged `NO` completion; carries the server's text.
    #[error("server refused command: {0}")]
    No(String),

    /// Tagged `BAD` completion; carries the server's text.
    #[error("server rejected command: {0}")]
    Bad(String),

    /// Server announced it is closing the connection.
    #[error("server sent BYE: {0}")]
    Bye(String),

    /// Wire-level protocol violation (oversized literal, missing
    /// continuation, unexpected token stream).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Operation is not valid for the session's current state.
    #[error("invalid session state: {0}")]
    State(String),
}

/// Result alias for IMAP operations.
pub type Result<T> = std::result::Result<T, Error>;
