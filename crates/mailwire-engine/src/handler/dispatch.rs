//! Request execution against the live protocol session.

use mailwire_imap::{FetchItems, Flag, Flags, SequenceSet, StoreAction, utf7};

use crate::client::ProtocolClient;
use crate::error::EngineError;
use crate::events::{EngineEvent, Progress};
use crate::folder::{FolderTreeItem, build_tree};
use crate::message::{FolderMessage, MessageEnvelope, MessageFlags};
use crate::refresh::{self, RefreshOutcome};
use crate::request::{Request, RequestKind, RequestUpdate, ResultPayload};
use crate::token::{MessageToken, ProviderUid};

use super::ConnectionHandler;

impl ConnectionHandler {
    /// Runs one request to completion, delivering all of its updates.
    ///
    /// Returns true when the failure was fatal to the connection.
    /// Deliberate failures are broadcast; background failures are only
    /// logged.
    pub(crate) async fn execute(&mut self, request: Request) -> bool {
        match self.dispatch(&request).await {
            Ok(payload) => {
                request.send(RequestUpdate::done(payload));
                false
            }
            Err(err) => {
                let fatal = err.is_fatal();
                if request.deliberate {
                    self.events.publish(EngineEvent::RequestFailed {
                        message: err.to_string(),
                        recoverable: !fatal,
                    });
                } else {
                    tracing::warn!(
                        account = %self.config.name,
                        error = %err,
                        "background request failed"
                    );
                }
                request.fail(err);
                fatal
            }
        }
    }

    async fn dispatch(&mut self, request: &Request) -> crate::Result<ResultPayload> {
        match &request.kind {
            RequestKind::FolderTree => self.folder_tree().await,
            RequestKind::FolderStatus { folders } => self.folder_status(folders).await,
            RequestKind::FolderMessagesRange {
                folder,
                first,
                last,
            } => self.messages_range(folder, *first, *last, request).await,
            RequestKind::FolderMessagesSet { folder, tokens } => {
                self.messages_set(folder, tokens, request).await
            }
            RequestKind::FolderMessagesRecent { folder } => {
                self.messages_recent(folder, request).await
            }
            RequestKind::FolderRefresh { folder, cached } => {
                self.folder_refresh(folder, cached.clone()).await
            }
            RequestKind::MessageFetch { token } => self.message_fetch(token).await,
            RequestKind::MessageParts {
                token,
                part_address,
            } => self.message_parts(token, part_address.as_deref()).await,
            RequestKind::MessageDelete { token } => {
                self.change_flags(token, Flag::Deleted, true).await
            }
            RequestKind::MessageUndelete { token } => {
                self.change_flags(token, Flag::Deleted, false).await
            }
            RequestKind::MessageAnswered { token, answered } => {
                self.change_flags(token, Flag::Answered, *answered).await
            }
            RequestKind::MessageForwarded { token, forwarded } => {
                self.change_flags(token, Flag::Keyword("$Forwarded".to_string()), *forwarded)
                    .await
            }
            RequestKind::MessageAppend { folder, raw, seen } => {
                self.message_append(folder, raw, *seen).await
            }
            RequestKind::MessageCopy { token, destination } => {
                self.message_copy(token, destination).await
            }
            RequestKind::SetIdleEnabled { enabled } => {
                self.idle_enabled = *enabled;
                Ok(ResultPayload::Done)
            }
            // Consumed by the state loop before dispatch.
            RequestKind::Disconnect => Ok(ResultPayload::Done),
        }
    }

    fn client(&mut self) -> crate::Result<&mut ProtocolClient> {
        self.client.as_mut().ok_or(EngineError::Protocol {
            text: "not connected".to_string(),
            recoverable: true,
        })
    }

    /// Progress callback that republishes byte counts on the bus.
    fn progress_sink(&self) -> impl FnMut(u64) + use<> {
        let events = self.events.clone();
        move |bytes| events.publish(EngineEvent::Progress(Progress::Bytes(bytes)))
    }

    /// Makes `folder` the selected mailbox, reconciling the index map.
    ///
    /// A selection whose counters invalidate the map raises a
    /// refresh-required event instead of silently proceeding on stale
    /// assumptions; the operation itself continues, addressing by UID.
    pub(crate) async fn select_folder(&mut self, folder: &str) -> crate::Result<()> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }
        let encoded = utf7::encode(folder);
        let ProtocolClient::Imap(session) = self.client()? else {
            return Ok(());
        };
        let summary = session.select(&encoded).await?;
        if !self.mailbox.apply_select(&summary) {
            self.events.publish(EngineEvent::RefreshRequired {
                folder: folder.to_string(),
            });
        }
        self.selected = Some(folder.to_string());
        self.push_folder = None;
        Ok(())
    }

    async fn folder_tree(&mut self) -> crate::Result<ResultPayload> {
        match self.client()? {
            ProtocolClient::Imap(session) => {
                let entries = session.list("", "*").await?;
                let flat: Vec<(String, Option<char>, bool)> = entries
                    .iter()
                    .map(|entry| {
                        let decoded = utf7::decode(&entry.name)
                            .unwrap_or_else(|_| entry.name.clone());
                        (decoded, entry.delimiter, entry.selectable())
                    })
                    .collect();
                Ok(ResultPayload::FolderTree(build_tree(&flat)))
            }
            ProtocolClient::Pop(_) => {
                let inbox = FolderTreeItem::new("INBOX", "INBOX", None);
                Ok(ResultPayload::FolderTree(vec![inbox]))
            }
        }
    }

    async fn folder_status(&mut self, folders: &[String]) -> crate::Result<ResultPayload> {
        match self.client()? {
            ProtocolClient::Imap(session) => {
                let encoded: Vec<String> = folders.iter().map(|f| utf7::encode(f)).collect();
                let counts = session.status_many(&encoded).await?;
                let rows = folders
                    .iter()
                    .zip(counts)
                    .filter_map(|(folder, (_, counts))| {
                        counts.map(|c| (folder.clone(), c.messages, c.unseen))
                    })
                    .collect();
                Ok(ResultPayload::FolderStatus(rows))
            }
            ProtocolClient::Pop(session) => {
                let stat = session.stat().await?;
                Ok(ResultPayload::FolderStatus(vec![(
                    "INBOX".to_string(),
                    stat.count,
                    0,
                )]))
            }
        }
    }

    async fn messages_range(
        &mut self,
        folder: &str,
        first: u32,
        last: u32,
        request: &Request,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(folder).await?;
        let mut on_block = self.progress_sink();
        let ProtocolClient::Imap(session) = self.client()? else {
            return Err(EngineError::Unsupported("message ranges over POP3"));
        };
        let fetched = session
            .fetch(
                SequenceSet::range(first, last),
                FetchItems::Summary,
                false,
                &mut on_block,
            )
            .await?;
        self.deliver_summaries(folder, fetched, request)
    }

    /// Converts fetched records into list rows, streaming each row as a
    /// partial update with percent progress for the processing phase.
    fn deliver_summaries(
        &mut self,
        folder: &str,
        fetched: Vec<(mailwire_imap::SeqNum, mailwire_imap::FetchData)>,
        request: &Request,
    ) -> crate::Result<ResultPayload> {
        let total = fetched.len();
        let mut messages = Vec::with_capacity(total);
        for (done, (seq, data)) in fetched.into_iter().enumerate() {
            if let Some(message) = summary_message(folder, seq.0, &data) {
                self.mailbox.insert(seq.0, message.token.clone());
                request.send(RequestUpdate::partial(ResultPayload::Messages(vec![
                    message.clone(),
                ])));
                messages.push(message);
            }
            let percent = ((done + 1) * 100 / total.max(1)).min(100);
            self.events.publish(EngineEvent::Progress(Progress::Percent(
                u8::try_from(percent).unwrap_or(100),
            )));
        }
        Ok(ResultPayload::Messages(messages))
    }

    async fn messages_set(
        &mut self,
        folder: &str,
        tokens: &[MessageToken],
        request: &Request,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(folder).await?;
        let mut on_block = self.progress_sink();
        let ProtocolClient::Imap(session) = self.client()? else {
            return Err(EngineError::Unsupported("message sets over POP3"));
        };
        let uids: Vec<u32> = tokens
            .iter()
            .filter_map(|t| match t.uid() {
                ProviderUid::Imap(uid) => Some(*uid),
                _ => None,
            })
            .collect();
        if uids.is_empty() {
            return Ok(ResultPayload::Messages(Vec::new()));
        }
        let fetched = session
            .fetch(
                SequenceSet::of(&uids),
                FetchItems::Summary,
                true,
                &mut on_block,
            )
            .await?;
        self.deliver_summaries(folder, fetched, request)
    }

    async fn messages_recent(
        &mut self,
        folder: &str,
        request: &Request,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(folder).await?;
        let counters = *self.mailbox.counters();
        if counters.recent == 0 || counters.exists == 0 {
            return Ok(ResultPayload::Messages(Vec::new()));
        }
        let first = counters.exists.saturating_sub(counters.recent) + 1;
        self.messages_range(folder, first, counters.exists, request)
            .await
    }

    async fn folder_refresh(
        &mut self,
        folder: &str,
        cached: Vec<MessageToken>,
    ) -> crate::Result<ResultPayload> {
        if self.should_bypass_refresh(folder) {
            // Live push already keeps this folder current.
            return Ok(ResultPayload::Refresh(RefreshOutcome::default()));
        }
        let limit = self.config.maximum_folder_messages;
        let recheck = std::mem::take(&mut self.new_mail_raced);
        let mut on_block = self.progress_sink();
        let mailbox = &mut self.mailbox;
        match self.client.as_mut().ok_or(EngineError::Protocol {
            text: "not connected".to_string(),
            recoverable: true,
        })? {
            ProtocolClient::Imap(session) => {
                let outcome = refresh::imap::refresh(
                    session,
                    mailbox,
                    folder,
                    cached,
                    limit,
                    recheck,
                    &mut on_block,
                )
                .await?;
                self.selected = Some(folder.to_string());
                self.push_folder = None;
                Ok(ResultPayload::Refresh(outcome))
            }
            ProtocolClient::Pop(session) => {
                if folder != "INBOX" {
                    // Locked folder: exists only in the local cache.
                    return Ok(ResultPayload::Refresh(RefreshOutcome::default()));
                }
                let outcome =
                    refresh::pop::refresh(session, folder, cached, limit, &mut on_block).await?;
                Ok(ResultPayload::Refresh(outcome))
            }
        }
    }

    /// Refresh for the folder live push is watching carries no new
    /// information; the decision reads worker state, mutates nothing.
    pub(crate) fn should_bypass_refresh(&self, folder: &str) -> bool {
        self.push_folder.as_deref() == Some(folder)
    }

    async fn message_fetch(&mut self, token: &MessageToken) -> crate::Result<ResultPayload> {
        if !token.is_loadable() {
            return Err(EngineError::Unsupported("local-only message"));
        }
        self.select_folder(token.folder_path()).await?;
        let mut on_block = self.progress_sink();
        match self.client()? {
            ProtocolClient::Imap(session) => {
                let ProviderUid::Imap(uid) = token.uid() else {
                    return Err(EngineError::Unsupported("token protocol mismatch"));
                };
                let fetched = session
                    .fetch(
                        SequenceSet::single(*uid),
                        FetchItems::FullBody,
                        true,
                        &mut on_block,
                    )
                    .await?;
                let raw = fetched
                    .into_iter()
                    .flat_map(|(_, data)| data.sections)
                    .find(|section| section.address.is_empty())
                    .map(|section| section.data)
                    .ok_or_else(|| EngineError::Protocol {
                        text: "no body returned".to_string(),
                        recoverable: true,
                    })?;
                Ok(ResultPayload::MessageBody {
                    token: token.clone(),
                    raw,
                })
            }
            ProtocolClient::Pop(session) => {
                let msg = pop_message_number(session, token).await?;
                let raw = session.retr(msg, &mut on_block).await?;
                Ok(ResultPayload::MessageBody {
                    token: token.clone(),
                    raw,
                })
            }
        }
    }

    async fn message_parts(
        &mut self,
        token: &MessageToken,
        part_address: Option<&str>,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(token.folder_path()).await?;
        let mut on_block = self.progress_sink();
        let ProtocolClient::Imap(session) = self.client()? else {
            return Err(EngineError::Unsupported("message parts over POP3"));
        };
        let ProviderUid::Imap(uid) = token.uid() else {
            return Err(EngineError::Unsupported("token protocol mismatch"));
        };
        match part_address {
            None => {
                let fetched = session
                    .fetch(
                        SequenceSet::single(*uid),
                        FetchItems::Structure,
                        true,
                        &mut on_block,
                    )
                    .await?;
                let part = fetched
                    .into_iter()
                    .find_map(|(_, data)| data.structure)
                    .ok_or_else(|| EngineError::Protocol {
                        text: "no structure returned".to_string(),
                        recoverable: true,
                    })?;
                Ok(ResultPayload::Structure {
                    token: token.clone(),
                    part,
                })
            }
            Some(address) => {
                let fetched = session
                    .fetch(
                        SequenceSet::single(*uid),
                        FetchItems::Section(address.to_string()),
                        true,
                        &mut on_block,
                    )
                    .await?;
                let raw = fetched
                    .into_iter()
                    .flat_map(|(_, data)| data.sections)
                    .find(|section| section.address == address)
                    .map(|section| section.data)
                    .ok_or_else(|| EngineError::Protocol {
                        text: format!("no content for part {address}"),
                        recoverable: true,
                    })?;
                Ok(ResultPayload::PartContent {
                    token: token.clone(),
                    part_address: address.to_string(),
                    raw,
                })
            }
        }
    }

    async fn change_flags(
        &mut self,
        token: &MessageToken,
        flag: Flag,
        set: bool,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(token.folder_path()).await?;
        match self.client()? {
            ProtocolClient::Imap(session) => {
                let ProviderUid::Imap(uid) = token.uid() else {
                    return Err(EngineError::Unsupported("token protocol mismatch"));
                };
                let action = if set {
                    StoreAction::Add
                } else {
                    StoreAction::Remove
                };
                let flags: Flags = std::iter::once(flag).collect();
                let reported = session
                    .store(SequenceSet::single(*uid), action, flags, true)
                    .await?;
                let mut updated = Vec::new();
                for (seq, data) in reported {
                    if let Some(message) =
                        summary_message(token.folder_path(), seq.0, &data)
                    {
                        updated.push(message);
                    }
                }
                Ok(ResultPayload::FlagsChanged(updated))
            }
            ProtocolClient::Pop(session) => match (&flag, set) {
                (Flag::Deleted, true) => {
                    let msg = pop_message_number(session, token).await?;
                    session.dele(msg).await?;
                    Ok(ResultPayload::Done)
                }
                // RSET is the only undelete POP3 has; it clears every
                // pending deletion in the session.
                (Flag::Deleted, false) => {
                    session.rset().await?;
                    Ok(ResultPayload::Done)
                }
                _ => Err(EngineError::Unsupported("flags over POP3")),
            },
        }
    }

    async fn message_append(
        &mut self,
        folder: &str,
        raw: &[u8],
        seen: bool,
    ) -> crate::Result<ResultPayload> {
        let encoded = utf7::encode(folder);
        let ProtocolClient::Imap(session) = self.client()? else {
            return Err(EngineError::Unsupported("append over POP3"));
        };
        let flags: Flags = if seen {
            std::iter::once(Flag::Seen).collect()
        } else {
            Flags::new()
        };
        session.append(&encoded, flags, raw).await?;
        Ok(ResultPayload::Done)
    }

    async fn message_copy(
        &mut self,
        token: &MessageToken,
        destination: &str,
    ) -> crate::Result<ResultPayload> {
        self.select_folder(token.folder_path()).await?;
        let encoded = utf7::encode(destination);
        let ProtocolClient::Imap(session) = self.client()? else {
            return Err(EngineError::Unsupported("copy over POP3"));
        };
        let ProviderUid::Imap(uid) = token.uid() else {
            return Err(EngineError::Unsupported("token protocol mismatch"));
        };
        session
            .copy(SequenceSet::single(*uid), &encoded, true)
            .await?;
        Ok(ResultPayload::Done)
    }
}

/// Builds the list-row message from a summary FETCH record.
fn summary_message(
    folder: &str,
    seq: u32,
    data: &mailwire_imap::FetchData,
) -> Option<FolderMessage> {
    let uid = data.uid?;
    let token = MessageToken::with_index(folder, ProviderUid::Imap(uid.0), seq);
    let mut message = FolderMessage::new(token);
    if let Some(envelope) = &data.envelope {
        message.envelope = MessageEnvelope::from_imap(envelope);
    }
    if let Some(flags) = &data.flags {
        message.flags = MessageFlags::from_imap(flags);
    }
    message.size = data.size.unwrap_or(0);
    Some(message)
}

/// Resolves a POP3 token to its current message number via UIDL.
async fn pop_message_number<S>(
    session: &mut mailwire_pop3::Pop3Session<S>,
    token: &MessageToken,
) -> crate::Result<u32>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let ProviderUid::Pop(wanted) = token.uid() else {
        return Err(EngineError::Unsupported("token protocol mismatch"));
    };
    let listing = session.uidl().await?;
    listing
        .into_iter()
        .find(|item| item.uid == *wanted)
        .map(|item| item.msg)
        .ok_or_else(|| EngineError::Protocol {
            text: format!("message {wanted} no longer on server"),
            recoverable: true,
        })
}
