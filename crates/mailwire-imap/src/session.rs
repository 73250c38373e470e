//! Typed IMAP session.
//!
//! [`ImapSession`] owns the framed transport and the tag sequence, and maps
//! each protocol operation to a send-then-read-until-tagged exchange. It is
//! deliberately stateless about mailbox selection and authentication; the
//! caller owns that lifecycle and this type only refuses what the server
//! refuses.
//!
//! Generic over the stream so tests can drive it with mock I/O.

use std::collections::BTreeMap;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::{Command, FetchItems, StoreAction, TagSequence};
use crate::connection::{ImapStream, WireStream};
use crate::idle::IdleHandle;
use crate::parser::{Completion, FetchData, RespCode, ServerResponse, UntaggedResponse};
use crate::types::{
    CapabilitySet, Flags, ListEntry, SelectSummary, SeqNum, SequenceSet, StatusCounts,
};
use crate::{Error, Result};

/// Result of a NOOP poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoopSummary {
    /// New `EXISTS` count, if the server reported one.
    pub exists: Option<u32>,
    /// New `RECENT` count, if the server reported one. New mail is signaled
    /// by this being present and positive, not by mere command success.
    pub recent: Option<u32>,
    /// Sequence numbers expunged since the last command.
    pub expunged: Vec<SeqNum>,
}

impl NoopSummary {
    /// Returns true if the poll observed new mail.
    #[must_use]
    pub fn has_new_mail(&self) -> bool {
        self.recent.is_some_and(|n| n > 0)
    }
}

/// One live IMAP session over a connected stream.
pub struct ImapSession<S> {
    wire: WireStream<S>,
    tags: TagSequence,
    capabilities: CapabilitySet,
}

impl<S> ImapSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a freshly connected stream. The server greeting has not been
    /// read yet; call [`Self::greeting`] before anything else.
    pub fn new(stream: S) -> Self {
        Self {
            wire: WireStream::new(stream),
            tags: TagSequence::new(),
            capabilities: CapabilitySet::new(),
        }
    }

    /// Capabilities seen so far (greeting, CAPABILITY, or login codes).
    #[must_use]
    pub const fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Total bytes received on this connection, for progress reporting.
    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.wire.bytes_received()
    }

    /// Reads and checks the server greeting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server refuses the connection, or a
    /// parse/protocol error for a malformed greeting.
    pub async fn greeting(&mut self) -> Result<()> {
        let block = self.wire.read_block().await?;
        match ServerResponse::parse(&block)? {
            ServerResponse::Untagged(UntaggedResponse::Ok { code, .. }) => {
                if let Some(RespCode::Capability(caps)) = code {
                    self.capabilities = caps;
                }
                Ok(())
            }
            ServerResponse::Untagged(UntaggedResponse::Bye { text }) => Err(Error::Bye(text)),
            other => Err(Error::Protocol(format!("unexpected greeting: {other:?}"))),
        }
    }

    /// Sends one command and collects responses through its tagged reply.
    ///
    /// The tagged reply is included in the returned list. `NO`/`BAD`
    /// completions become [`Error::No`]/[`Error::Bad`] carrying the
    /// server's text.
    pub async fn run(&mut self, command: &Command) -> Result<Vec<ServerResponse>> {
        self.run_with(command, |_| {}).await
    }

    /// Like [`Self::run`], invoking `on_block` with the cumulative received
    /// byte count after every response block. Large fetches use this to
    /// surface granular progress.
    pub async fn run_with(
        &mut self,
        command: &Command,
        mut on_block: impl FnMut(u64),
    ) -> Result<Vec<ServerResponse>> {
        let tag = self.tags.next_tag();
        let line = command.serialize(&tag);
        self.wire.send_line(line.as_bytes()).await?;
        self.read_until_tagged(&tag, &mut on_block).await
    }

    async fn read_until_tagged(
        &mut self,
        tag: &str,
        on_block: &mut impl FnMut(u64),
    ) -> Result<Vec<ServerResponse>> {
        let mut responses = Vec::new();
        loop {
            let block = self.wire.read_block().await?;
            on_block(self.wire.bytes_received());

            let response = match ServerResponse::parse(&block) {
                Ok(r) => r,
                Err(err) => {
                    // Listing stays best-effort against a non-conformant
                    // server; one bad line must not kill the exchange.
                    tracing::warn!(error = %err, "skipping unparseable response");
                    continue;
                }
            };

            if let ServerResponse::Untagged(UntaggedResponse::Capability(caps)) = &response {
                self.capabilities = caps.clone();
            }

            let done = response.is_tagged_for(tag);
            if done {
                if let ServerResponse::Tagged {
                    status,
                    code,
                    text,
                    ..
                } = &response
                {
                    match status {
                        Completion::Ok => {
                            if let Some(RespCode::Capability(caps)) = code {
                                self.capabilities = caps.clone();
                            }
                        }
                        Completion::No => return Err(Error::No(text.clone())),
                        Completion::Bad => return Err(Error::Bad(text.clone())),
                    }
                }
            }
            responses.push(response);
            if done {
                return Ok(responses);
            }
        }
    }

    /// Authenticates with LOGIN.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<()> {
        self.run(&Command::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        Ok(())
    }

    /// Requests the server's capability list.
    pub async fn capability(&mut self) -> Result<CapabilitySet> {
        self.run(&Command::Capability).await?;
        Ok(self.capabilities.clone())
    }

    /// Selects a mailbox (wire-encoded name) and returns its counters.
    ///
    /// The counters arrive as untagged lines in server-chosen order; each
    /// is picked up wherever it appears, and anything the server omits
    /// stays at the `0` sentinel.
    pub async fn select(&mut self, mailbox: &str) -> Result<SelectSummary> {
        let responses = self
            .run(&Command::Select {
                mailbox: mailbox.to_string(),
            })
            .await?;

        let mut summary = SelectSummary::default();
        for response in &responses {
            match response {
                ServerResponse::Untagged(UntaggedResponse::Exists(n)) => summary.exists = *n,
                ServerResponse::Untagged(UntaggedResponse::Recent(n)) => summary.recent = *n,
                ServerResponse::Untagged(UntaggedResponse::Ok { code: Some(code), .. })
                | ServerResponse::Tagged {
                    code: Some(code), ..
                } => match code {
                    RespCode::Unseen(n) => summary.unseen = *n,
                    RespCode::UidValidity(n) => summary.uid_validity = *n,
                    RespCode::UidNext(n) => summary.uid_next = *n,
                    RespCode::ReadOnly => summary.read_only = true,
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Closes the selected mailbox, expunging `\Deleted` messages.
    pub async fn close(&mut self) -> Result<()> {
        self.run(&Command::Close).await?;
        Ok(())
    }

    /// Fetches STATUS counters for several mailboxes in one burst.
    ///
    /// All commands are written before any reply is read; replies are
    /// correlated back by tag, with the untagged STATUS data keyed by the
    /// echoed mailbox name. A mailbox the server refuses yields `None`
    /// rather than failing the whole batch.
    pub async fn status_many(
        &mut self,
        mailboxes: &[String],
    ) -> Result<Vec<(String, Option<StatusCounts>)>> {
        let mut pending: Vec<(String, String)> = Vec::with_capacity(mailboxes.len());
        for mailbox in mailboxes {
            let tag = self.tags.next_tag();
            let line = Command::Status {
                mailbox: mailbox.clone(),
            }
            .serialize(&tag);
            self.wire.send_line(line.as_bytes()).await?;
            pending.push((tag, mailbox.clone()));
        }

        let mut by_name: BTreeMap<String, StatusCounts> = BTreeMap::new();
        let mut completed = 0usize;
        while completed < pending.len() {
            let block = self.wire.read_block().await?;
            let response = match ServerResponse::parse(&block) {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unparseable status reply");
                    continue;
                }
            };
            match response {
                ServerResponse::Untagged(UntaggedResponse::Status { mailbox, counts }) => {
                    by_name.insert(mailbox, counts);
                }
                ServerResponse::Tagged { tag, status, .. } => {
                    if pending.iter().any(|(t, _)| *t == tag) {
                        completed += 1;
                        if status == Completion::Bad {
                            tracing::warn!(%tag, "status command rejected");
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(pending
            .into_iter()
            .map(|(_, mailbox)| {
                let counts = by_name.remove(&mailbox);
                (mailbox, counts)
            })
            .collect())
    }

    /// Lists mailboxes matching a pattern.
    pub async fn list(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        let responses = self
            .run(&Command::List {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(collect_list(&responses, false))
    }

    /// Lists subscribed mailboxes matching a pattern.
    pub async fn lsub(&mut self, reference: &str, pattern: &str) -> Result<Vec<ListEntry>> {
        let responses = self
            .run(&Command::Lsub {
                reference: reference.to_string(),
                pattern: pattern.to_string(),
            })
            .await?;
        Ok(collect_list(&responses, true))
    }

    /// Fetches data items for a message set, merging interleaved FETCH
    /// lines into one record per sequence number.
    pub async fn fetch(
        &mut self,
        set: SequenceSet,
        items: FetchItems,
        uid: bool,
        on_block: impl FnMut(u64),
    ) -> Result<Vec<(SeqNum, FetchData)>> {
        let responses = self
            .run_with(&Command::Fetch { set, items, uid }, on_block)
            .await?;
        Ok(collect_fetch(&responses))
    }

    /// Adds or removes flags on a message set, returning the server's
    /// updated flag reports.
    pub async fn store(
        &mut self,
        set: SequenceSet,
        action: StoreAction,
        flags: Flags,
        uid: bool,
    ) -> Result<Vec<(SeqNum, FetchData)>> {
        let responses = self
            .run(&Command::Store {
                set,
                action,
                flags,
                uid,
            })
            .await?;
        Ok(collect_fetch(&responses))
    }

    /// Copies a message set into another mailbox (wire-encoded name).
    pub async fn copy(&mut self, set: SequenceSet, mailbox: &str, uid: bool) -> Result<()> {
        self.run(&Command::Copy {
            set,
            mailbox: mailbox.to_string(),
            uid,
        })
        .await?;
        Ok(())
    }

    /// Appends a raw message to a mailbox.
    ///
    /// Sends the command header, waits for the server's `+` continuation
    /// prompt, then streams the literal bytes.
    pub async fn append(&mut self, mailbox: &str, flags: Flags, body: &[u8]) -> Result<()> {
        let tag = self.tags.next_tag();
        let line = Command::Append {
            mailbox: mailbox.to_string(),
            flags,
            size: body.len(),
        }
        .serialize(&tag);
        self.wire.send_line(line.as_bytes()).await?;

        // The server may interleave untagged traffic before the prompt. A
        // tagged reply here means the append was refused outright.
        loop {
            let block = self.wire.read_block().await?;
            match ServerResponse::parse(&block)? {
                ServerResponse::Continuation(_) => break,
                ServerResponse::Tagged { status, text, .. } => {
                    return match status {
                        Completion::No => Err(Error::No(text)),
                        _ => Err(Error::Bad(text)),
                    };
                }
                ServerResponse::Untagged(_) => {}
            }
        }

        self.wire.send_raw(body).await?;
        self.wire.send_raw(b"\r\n").await?;
        self.read_until_tagged(&tag, &mut |_| {}).await?;
        Ok(())
    }

    /// Polls the mailbox with NOOP.
    pub async fn noop(&mut self) -> Result<NoopSummary> {
        let responses = self.run(&Command::Noop).await?;
        let mut summary = NoopSummary::default();
        for response in &responses {
            match response {
                ServerResponse::Untagged(UntaggedResponse::Exists(n)) => {
                    summary.exists = Some(*n);
                }
                ServerResponse::Untagged(UntaggedResponse::Recent(n)) => {
                    summary.recent = Some(*n);
                }
                ServerResponse::Untagged(UntaggedResponse::Expunge(seq)) => {
                    summary.expunged.push(*seq);
                }
                _ => {}
            }
        }
        Ok(summary)
    }

    /// Queries the personal namespace prefix and delimiter.
    pub async fn namespace(&mut self) -> Result<Option<(String, Option<char>)>> {
        let responses = self.run(&Command::Namespace).await?;
        for response in responses {
            if let ServerResponse::Untagged(UntaggedResponse::Namespace { prefix, delimiter }) =
                response
            {
                return Ok(Some((prefix, delimiter)));
            }
        }
        Ok(None)
    }

    /// Enters IDLE (RFC 2177).
    ///
    /// Sends the command and waits for the continuation prompt; the
    /// returned handle reads unsolicited updates until [`IdleHandle::done`]
    /// restores command mode. The exchange is keyed by the IDLE command's
    /// own tag rather than an immediate tagged reply.
    pub async fn idle(&mut self) -> Result<IdleHandle<'_, S>> {
        let tag = self.tags.next_tag();
        let line = Command::Idle.serialize(&tag);
        self.wire.send_line(line.as_bytes()).await?;

        loop {
            let block = self.wire.read_block().await?;
            match ServerResponse::parse(&block)? {
                ServerResponse::Continuation(_) => break,
                ServerResponse::Tagged { status, text, .. } => {
                    return match status {
                        Completion::No => Err(Error::No(text)),
                        _ => Err(Error::Bad(text)),
                    };
                }
                ServerResponse::Untagged(_) => {}
            }
        }
        Ok(IdleHandle::new(self, tag))
    }

    /// Logs out. The server's BYE is expected and not an error here.
    pub async fn logout(&mut self) -> Result<()> {
        self.run(&Command::Logout).await?;
        Ok(())
    }

    pub(crate) async fn read_one(&mut self) -> Result<ServerResponse> {
        let block = self.wire.read_block().await?;
        ServerResponse::parse(&block)
    }

    pub(crate) async fn send_line(&mut self, line: &[u8]) -> Result<()> {
        self.wire.send_line(line).await
    }

    pub(crate) async fn finish_tag(&mut self, tag: &str) -> Result<()> {
        self.read_until_tagged(tag, &mut |_| {}).await?;
        Ok(())
    }
}

impl ImapSession<ImapStream> {
    /// Issues STARTTLS and performs the in-place TLS upgrade.
    ///
    /// # Errors
    ///
    /// Fails if the server refuses the command, the stream is already TLS,
    /// or the handshake fails.
    pub async fn start_tls(mut self, host: &str) -> Result<Self> {
        self.run(&Command::StartTls).await?;
        let tags = self.tags;
        let capabilities = self.capabilities;
        let stream = self.wire.into_inner().upgrade(host).await?;
        Ok(Self {
            wire: WireStream::new(stream),
            tags,
            // Capabilities may legally change across the upgrade; the
            // caller should re-issue CAPABILITY.
            capabilities,
        })
    }
}

fn collect_list(responses: &[ServerResponse], subscribed: bool) -> Vec<ListEntry> {
    responses
        .iter()
        .filter_map(|r| match r {
            ServerResponse::Untagged(UntaggedResponse::List(entry)) if !subscribed => {
                Some(entry.clone())
            }
            ServerResponse::Untagged(UntaggedResponse::Lsub(entry)) if subscribed => {
                Some(entry.clone())
            }
            _ => None,
        })
        .collect()
}

fn collect_fetch(responses: &[ServerResponse]) -> Vec<(SeqNum, FetchData)> {
    let mut merged: BTreeMap<u32, FetchData> = BTreeMap::new();
    for response in responses {
        if let ServerResponse::Untagged(UntaggedResponse::Fetch { seq, data }) = response {
            merged
                .entry(seq.0)
                .and_modify(|existing| existing.merge(data.clone()))
                .or_insert_with(|| data.clone());
        }
    }
    merged
        .into_iter()
        .map(|(seq, data)| (SeqNum(seq), data))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Flag;
    use tokio_test::io::{Builder, Mock};

    fn session(mock: Mock) -> ImapSession<Mock> {
        ImapSession::new(mock)
    }

    #[tokio::test]
    async fn greeting_captures_capabilities() {
        let mock = Builder::new()
            .read(b"* OK [CAPABILITY IMAP4rev1 IDLE] ready\r\n")
            .build();
        let mut s = session(mock);
        s.greeting().await.unwrap();
        assert!(s.capabilities().supports_idle());
    }

    #[tokio::test]
    async fn greeting_bye_is_an_error() {
        let mock = Builder::new().read(b"* BYE overloaded\r\n").build();
        let mut s = session(mock);
        assert!(matches!(s.greeting().await, Err(Error::Bye(_))));
    }

    #[tokio::test]
    async fn login_no_carries_server_text() {
        let mock = Builder::new()
            .write(b"A0 LOGIN \"u\" \"p\"\r\n")
            .read(b"A0 NO [AUTHENTICATIONFAILED] bad credentials\r\n")
            .build();
        let mut s = session(mock);
        let err = s.login("u", "p").await.unwrap_err();
        assert!(matches!(err, Error::No(text) if text == "bad credentials"));
    }

    #[tokio::test]
    async fn select_scans_counters_in_any_order() {
        let mock = Builder::new()
            .write(b"A0 SELECT INBOX\r\n")
            .read(b"* OK [UIDVALIDITY 857529045] UIDs valid\r\n")
            .read(b"* 172 EXISTS\r\n")
            .read(b"* OK [UIDNEXT 4392] next UID\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"* OK [UNSEEN 12] first unseen\r\n")
            .read(b"A0 OK [READ-WRITE] SELECT completed\r\n")
            .build();
        let mut s = session(mock);
        let summary = s.select("INBOX").await.unwrap();
        assert_eq!(summary.exists, 172);
        assert_eq!(summary.recent, 1);
        assert_eq!(summary.unseen, 12);
        assert_eq!(summary.uid_validity, 857_529_045);
        assert_eq!(summary.uid_next, 4392);
        assert!(!summary.read_only);
    }

    #[tokio::test]
    async fn select_reversed_order_yields_same_summary() {
        let mock = Builder::new()
            .write(b"A0 SELECT INBOX\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"* OK [UIDNEXT 4392] next UID\r\n")
            .read(b"* 172 EXISTS\r\n")
            .read(b"* OK [UIDVALIDITY 857529045] UIDs valid\r\n")
            .read(b"A0 OK done\r\n")
            .build();
        let mut s = session(mock);
        let summary = s.select("INBOX").await.unwrap();
        assert_eq!(summary.exists, 172);
        assert_eq!(summary.uid_validity, 857_529_045);
        assert_eq!(summary.uid_next, 4392);
        // UNSEEN was never reported; sentinel stays.
        assert_eq!(summary.unseen, 0);
    }

    #[tokio::test]
    async fn status_burst_correlates_by_name() {
        let mock = Builder::new()
            .write(b"A0 STATUS INBOX (MESSAGES RECENT UNSEEN)\r\n")
            .write(b"A1 STATUS Archive (MESSAGES RECENT UNSEEN)\r\n")
            .read(b"* STATUS Archive (MESSAGES 9 UNSEEN 2)\r\n")
            .read(b"A1 OK done\r\n")
            .read(b"* STATUS INBOX (MESSAGES 40 RECENT 3 UNSEEN 7)\r\n")
            .read(b"A0 OK done\r\n")
            .build();
        let mut s = session(mock);
        let result = s
            .status_many(&["INBOX".to_string(), "Archive".to_string()])
            .await
            .unwrap();
        assert_eq!(result[0].0, "INBOX");
        assert_eq!(result[0].1.unwrap().messages, 40);
        assert_eq!(result[1].0, "Archive");
        assert_eq!(result[1].1.unwrap().unseen, 2);
    }

    #[tokio::test]
    async fn fetch_merges_interleaved_lines() {
        let mock = Builder::new()
            .write(b"A0 UID FETCH 1:* (FLAGS UID)\r\n")
            .read(b"* 1 FETCH (UID 101)\r\n")
            .read(b"* 2 FETCH (UID 102 FLAGS (\\Seen))\r\n")
            .read(b"* 1 FETCH (FLAGS (\\Answered))\r\n")
            .read(b"A0 OK FETCH completed\r\n")
            .build();
        let mut s = session(mock);
        let rows = s
            .fetch(SequenceSet::from_to_end(1), FetchItems::Flags, true, |_| {})
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        let (seq, data) = &rows[0];
        assert_eq!(*seq, SeqNum(1));
        assert_eq!(data.uid.unwrap().0, 101);
        assert!(data.flags.as_ref().unwrap().contains(&Flag::Answered));
    }

    #[tokio::test]
    async fn append_waits_for_continuation() {
        let mock = Builder::new()
            .write(b"A0 APPEND Drafts (\\Draft) {11}\r\n")
            .read(b"+ go ahead\r\n")
            .write(b"hello draft")
            .write(b"\r\n")
            .read(b"A0 OK APPEND completed\r\n")
            .build();
        let mut s = session(mock);
        s.append(
            "Drafts",
            std::iter::once(Flag::Draft).collect(),
            b"hello draft",
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn noop_detects_new_mail_via_recent() {
        let mock = Builder::new()
            .write(b"A0 NOOP\r\n")
            .read(b"* 23 EXISTS\r\n")
            .read(b"* 1 RECENT\r\n")
            .read(b"A0 OK NOOP completed\r\n")
            .build();
        let mut s = session(mock);
        let summary = s.noop().await.unwrap();
        assert!(summary.has_new_mail());
        assert_eq!(summary.exists, Some(23));
    }

    #[tokio::test]
    async fn noop_without_recent_is_quiet() {
        let mock = Builder::new()
            .write(b"A0 NOOP\r\n")
            .read(b"A0 OK NOOP completed\r\n")
            .build();
        let mut s = session(mock);
        assert!(!s.noop().await.unwrap().has_new_mail());
    }

    #[tokio::test]
    async fn idle_reads_updates_until_done() {
        let mock = Builder::new()
            .write(b"A0 IDLE\r\n")
            .read(b"+ idling\r\n")
            .read(b"* 24 EXISTS\r\n")
            .write(b"DONE\r\n")
            .read(b"A0 OK IDLE terminated\r\n")
            .build();
        let mut s = session(mock);
        let mut handle = s.idle().await.unwrap();
        let update = handle.wait().await.unwrap();
        assert_eq!(update, UntaggedResponse::Exists(24));
        handle.done().await.unwrap();
    }

    #[tokio::test]
    async fn unparseable_untagged_line_is_skipped() {
        let mock = Builder::new()
            .write(b"A0 NOOP\r\n")
            .read(b"\x01garbage\r\n")
            .read(b"A0 OK done\r\n")
            .build();
        let mut s = session(mock);
        assert!(s.noop().await.is_ok());
    }

    #[tokio::test]
    async fn list_returns_entries() {
        let mock = Builder::new()
            .write(b"A0 LIST \"\" \"*\"\r\n")
            .read(b"* LIST (\\HasNoChildren) \"/\" INBOX\r\n")
            .read(b"* LIST (\\Noselect \\HasChildren) \"/\" \"[Gmail]\"\r\n")
            .read(b"A0 OK done\r\n")
            .build();
        let mut s = session(mock);
        let entries = s.list("", "*").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "INBOX");
        assert!(!entries[1].selectable());
    }
}
