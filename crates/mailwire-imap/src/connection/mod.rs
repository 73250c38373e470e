//! Transport layer: TCP/TLS streams and IMAP framing.

mod framed;
mod stream;

pub use framed::WireStream;
pub use stream::{ImapStream, connect_plain, connect_tls, tls_connector};
