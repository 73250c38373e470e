//! # mailwire-imap
//!
//! An IMAP4rev1 (RFC 3501) client protocol library.
//!
//! ## Features
//!
//! - **Literal-aware framing**: `{n}` byte-counted continuations are
//!   coalesced before parsing, so folder names and bodies containing
//!   CRLF-looking bytes survive intact
//! - **Typed session API**: LOGIN, SELECT, STATUS (batched), LIST/LSUB,
//!   FETCH/STORE/COPY (with UID variants), APPEND, NOOP, NAMESPACE
//! - **IDLE support**: long-poll updates via RFC 2177
//! - **TLS via rustls**: implicit TLS and STARTTLS upgrade
//! - **Modified UTF-7**: exact mailbox-name codec, suitable for map keys
//! - **Sans-I/O parser**: response parsing separated from network I/O
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailwire_imap::{ImapSession, connection};
//!
//! #[tokio::main]
//! async fn main() -> mailwire_imap::Result<()> {
//!     let stream = connection::connect_tls("imap.example.com", 993).await?;
//!     let mut session = ImapSession::new(stream);
//!     session.greeting().await?;
//!     session.login("user@example.com", "password").await?;
//!
//!     for entry in session.list("", "*").await? {
//!         println!("{}", mailwire_imap::utf7::decode(&entry.name)?);
//!     }
//!
//!     let summary = session.select("INBOX").await?;
//!     println!("{} messages", summary.exists);
//!
//!     session.logout().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: command builders and tag generation
//! - [`connection`]: TCP/TLS streams and literal-aware framing
//! - [`parser`]: sans-I/O response parser
//! - [`types`]: core protocol types
//! - [`utf7`]: modified UTF-7 mailbox-name codec

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
mod idle;
pub mod parser;
mod session;
pub mod types;
pub mod utf7;

pub use command::{Command, FetchItems, StoreAction, TagSequence};
pub use connection::{ImapStream, WireStream, connect_plain, connect_tls};
pub use error::{Error, Result};
pub use idle::IdleHandle;
pub use parser::{
    BodySection, Completion, FetchData, MessagePart, PartContent, RespCode, ServerResponse,
    UntaggedResponse,
};
pub use session::{ImapSession, NoopSummary};
pub use types::{
    Address, CapabilitySet, Envelope, Flag, Flags, ListEntry, MailboxAttr, SelectSummary, SeqNum,
    SequenceSet, StatusCounts, Uid,
};
