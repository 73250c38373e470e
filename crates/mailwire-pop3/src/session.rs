//! Typed POP3 session (RFC 1939).

use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection::Pop3Wire;
use crate::Result;

/// `STAT` reply: message count and total octets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatInfo {
    /// Messages in the maildrop.
    pub count: u32,
    /// Total size in octets.
    pub size: u64,
}

/// One `LIST` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListItem {
    /// 1-based message number, valid only for this session.
    pub msg: u32,
    /// Message size in octets.
    pub size: u64,
}

/// One `UIDL` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidlItem {
    /// 1-based message number, valid only for this session.
    pub msg: u32,
    /// Server-assigned unique id, stable across sessions.
    pub uid: String,
}

/// One live POP3 session over a connected stream.
///
/// Message numbers are session-scoped; only UIDL ids survive reconnection.
/// Numbers in replies are parsed best-effort, degrading to `0` rather than
/// failing a whole listing on one malformed row.
pub struct Pop3Session<S> {
    wire: Pop3Wire<S>,
}

impl<S> Pop3Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly connected stream. The server greeting has not been
    /// read yet; call [`Self::greeting`] before anything else.
    pub fn new(stream: S) -> Self {
        Self {
            wire: Pop3Wire::new(stream),
        }
    }

    /// Total bytes received on this connection, for progress reporting.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.wire.bytes_received()
    }

    /// Reads and checks the server greeting.
    pub async fn greeting(&mut self) -> Result<()> {
        self.wire.read_status().await?.into_result()?;
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<String> {
        self.wire.send_line(line).await?;
        self.wire.read_status().await?.into_result()
    }

    /// Authenticates with USER/PASS.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.command(&format!("USER {username}")).await?;
        self.command(&format!("PASS {password}")).await?;
        Ok(())
    }

    /// Queries maildrop totals.
    pub async fn stat(&mut self) -> Result<StatInfo> {
        let text = self.command("STAT").await?;
        let mut words = text.split_ascii_whitespace();
        Ok(StatInfo {
            count: words.next().and_then(|w| w.parse().ok()).unwrap_or(0),
            size: words.next().and_then(|w| w.parse().ok()).unwrap_or(0),
        })
    }

    /// Lists message sizes.
    pub async fn list(&mut self) -> Result<Vec<ListItem>> {
        self.command("LIST").await?;
        let payload = self.wire.read_multiline(|_| {}).await?;
        Ok(parse_rows(&payload)
            .map(|(msg, rest)| ListItem {
                msg,
                size: rest.parse().unwrap_or(0),
            })
            .collect())
    }

    /// Lists unique ids for all messages.
    pub async fn uidl(&mut self) -> Result<Vec<UidlItem>> {
        self.command("UIDL").await?;
        let payload = self.wire.read_multiline(|_| {}).await?;
        Ok(parse_rows(&payload)
            .map(|(msg, rest)| UidlItem {
                msg,
                uid: rest.to_string(),
            })
            .collect())
    }

    /// Queries the unique id of one message.
    pub async fn uidl_one(&mut self, msg: u32) -> Result<String> {
        let text = self.command(&format!("UIDL {msg}")).await?;
        Ok(text
            .split_ascii_whitespace()
            .nth(1)
            .unwrap_or_default()
            .to_string())
    }

    /// Fetches the headers plus the first `lines` body lines.
    pub async fn top(&mut self, msg: u32, lines: u32) -> Result<Vec<u8>> {
        self.command(&format!("TOP {msg} {lines}")).await?;
        self.wire.read_multiline(|_| {}).await
    }

    /// Fetches a complete message, reporting cumulative byte counts to
    /// `on_block` as lines arrive.
    pub async fn retr(&mut self, msg: u32, on_block: impl FnMut(u64)) -> Result<Vec<u8>> {
        self.command(&format!("RETR {msg}")).await?;
        self.wire.read_multiline(on_block).await
    }

    /// Marks a message for deletion at QUIT.
    pub async fn dele(&mut self, msg: u32) -> Result<()> {
        self.command(&format!("DELE {msg}")).await?;
        Ok(())
    }

    /// Unmarks every message marked for deletion in this session.
    pub async fn rset(&mut self) -> Result<()> {
        self.command("RSET").await?;
        Ok(())
    }

    /// Keep-alive poll. POP3 never reports new mail mid-session; this only
    /// verifies the connection is still answering.
    pub async fn noop(&mut self) -> Result<()> {
        self.command("NOOP").await?;
        Ok(())
    }

    /// Ends the session, committing pending deletions.
    pub async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await?;
        Ok(())
    }
}

/// Splits a multi-line listing into `(message number, rest)` rows.
fn parse_rows(payload: &[u8]) -> impl Iterator<Item = (u32, &str)> {
    let text = std::str::from_utf8(payload).unwrap_or_default();
    text.lines().filter_map(|line| {
        let (num, rest) = line.split_once(' ')?;
        let msg = num.parse().ok()?;
        Some((msg, rest.trim()))
    })
}
