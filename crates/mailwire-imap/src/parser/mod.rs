//! Sans-I/O parser for IMAP server responses.
//!
//! [`crate::connection::WireStream`] delivers one coalesced block per
//! response (line plus embedded literals); this module turns a block into a
//! typed [`ServerResponse`] without touching the network.

mod fetch;
mod lexer;
mod response;
mod structure;

pub use fetch::{BodySection, FetchData};
pub use lexer::{Scanner, Token};
pub use response::{Completion, RespCode, ServerResponse, UntaggedResponse};
pub use structure::{MessagePart, PartContent};
