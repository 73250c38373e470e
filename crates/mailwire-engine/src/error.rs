//! Engine error taxonomy.
//!
//! Each variant encodes its own handling policy, so callers match on the
//! variant instead of inspecting a fatal/recoverable flag at runtime. Two
//! conditions are deliberately absent: index-map desync (self-healed in
//! [`crate::mailbox::MailboxState`], logged, never a request failure) and
//! skipped parse lines (logged per item, the listing continues).

use thiserror::Error;

/// Errors surfaced by the engine to request submitters and event listeners.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport failure. Always drives the connection toward Closing; the
    /// engine never retries on its own — resubmitting is the caller's call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tagged `NO`/`BAD`-style refusal carrying the server's text. When
    /// `recoverable`, only the originating request failed and the
    /// connection stays up.
    #[error("protocol error: {text}")]
    Protocol {
        /// Server's literal text.
        text: String,
        /// True when the connection remains usable.
        recoverable: bool,
    },

    /// Outgoing-path address refusal; recoverable with user correction.
    #[error("recipient rejected: {address}")]
    Recipient {
        /// The offending address.
        address: String,
    },

    /// Credentials are blank or were refused; the caller should prompt.
    #[error("authentication required")]
    LoginRequired,

    /// The request named a folder that is not selectable on this account.
    #[error("no such folder: {0}")]
    NoSuchFolder(String),

    /// The request was abandoned before it started (non-blocking shutdown).
    #[error("request abandoned: engine shutting down")]
    Abandoned,

    /// The operation is not meaningful for the account's protocol.
    #[error("unsupported for this protocol: {0}")]
    Unsupported(&'static str),
}

impl EngineError {
    /// True when the connection should be torn down in response.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Protocol { recoverable, .. } => !*recoverable,
            Self::Recipient { .. }
            | Self::LoginRequired
            | Self::NoSuchFolder(_)
            | Self::Abandoned
            | Self::Unsupported(_) => false,
        }
    }
}

impl From<mailwire_imap::Error> for EngineError {
    fn from(err: mailwire_imap::Error) -> Self {
        use mailwire_imap::Error as Imap;
        match err {
            Imap::Io(e) => Self::Io(e),
            Imap::Tls(e) => Self::Io(std::io::Error::other(e)),
            Imap::InvalidDnsName(e) => Self::Io(std::io::Error::other(e)),
            Imap::No(text) => Self::Protocol {
                text,
                recoverable: true,
            },
            Imap::Bad(text) | Imap::Protocol(text) | Imap::State(text) => Self::Protocol {
                text,
                recoverable: false,
            },
            Imap::Bye(text) => Self::Protocol {
                text,
                recoverable: false,
            },
            Imap::Parse { position, message } => Self::Protocol {
                text: format!("parse error at byte {position}: {message}"),
                recoverable: false,
            },
        }
    }
}

impl From<mailwire_pop3::Error> for EngineError {
    fn from(err: mailwire_pop3::Error) -> Self {
        use mailwire_pop3::Error as Pop;
        match err {
            Pop::Io(e) => Self::Io(e),
            Pop::Tls(e) => Self::Io(std::io::Error::other(e)),
            Pop::InvalidDnsName(e) => Self::Io(std::io::Error::other(e)),
            Pop::Err(text) => Self::Protocol {
                text,
                recoverable: true,
            },
            Pop::Protocol(text) => Self::Protocol {
                text,
                recoverable: false,
            },
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_is_fatal_refusal_is_not() {
        let io = EngineError::Io(std::io::Error::other("gone"));
        assert!(io.is_fatal());

        let no = EngineError::from(mailwire_imap::Error::No("denied".to_string()));
        assert!(!no.is_fatal());

        let bad = EngineError::from(mailwire_imap::Error::Bad("syntax".to_string()));
        assert!(bad.is_fatal());
    }
}
