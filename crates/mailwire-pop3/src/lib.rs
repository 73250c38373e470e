//! # mailwire-pop3
//!
//! A POP3 (RFC 1939) client protocol library.
//!
//! ## Features
//!
//! - **Dot-stuffed framing**: multi-line replies are read through the `.`
//!   terminator with byte-stuffing undone
//! - **Typed session API**: USER/PASS, STAT, LIST, UIDL, TOP, RETR, DELE,
//!   RSET, NOOP, QUIT
//! - **Header synthesis**: `TOP n 0` header blocks parse into
//!   envelope-shaped summaries, since the protocol has no ENVELOPE
//! - **TLS via rustls**: POP3S out of the box
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailwire_pop3::{Pop3Session, connection};
//!
//! #[tokio::main]
//! async fn main() -> mailwire_pop3::Result<()> {
//!     let stream = connection::connect_tls("pop.example.com", 995).await?;
//!     let mut session = Pop3Session::new(stream);
//!     session.greeting().await?;
//!     session.login("user@example.com", "password").await?;
//!
//!     for row in session.uidl().await? {
//!         let raw = session.top(row.msg, 0).await?;
//!         let summary = mailwire_pop3::HeaderBlock::parse(&raw).to_summary();
//!         println!("{}: {:?}", row.uid, summary.subject);
//!     }
//!
//!     session.quit().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod connection;
mod error;
mod headers;
mod session;

pub use connection::{Pop3Stream, Pop3Wire, StatusLine, connect_plain, connect_tls};
pub use error::{Error, Result};
pub use headers::{HeaderBlock, HeaderSummary};
pub use session::{ListItem, Pop3Session, StatInfo, UidlItem};
