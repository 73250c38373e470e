//! IMAP driver for the folder-refresh reconciliation.

use mailwire_imap::{FetchData, FetchItems, ImapSession, SequenceSet, utf7};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::mailbox::MailboxState;
use crate::message::{FolderMessage, MessageEnvelope, MessageFlags};
use crate::refresh::{Reconciler, RefreshOutcome};
use crate::token::{MessageToken, ProviderUid};
use crate::Result;

/// Runs one refresh pass for `folder` against a live IMAP session.
///
/// Selects the folder, reconciles the index map, and drives the phases of
/// [`Reconciler`] over the wire. `recheck_new_mail` adds one extra
/// recent-message fetch at the end, for the case where a new-mail push
/// raced the refresh. `on_block` receives cumulative byte counts for
/// progress display.
pub async fn refresh<S>(
    session: &mut ImapSession<S>,
    state: &mut MailboxState,
    folder: &str,
    cached: Vec<MessageToken>,
    limit: usize,
    recheck_new_mail: bool,
    mut on_block: impl FnMut(u64),
) -> Result<RefreshOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encoded = utf7::encode(folder);
    let summary = session.select(&encoded).await?;
    let map_valid = state.apply_select(&summary);

    let newest_cached = newest_cached_uid(&cached);
    let mut reconciler = Reconciler::new(cached, limit, !map_valid);

    // Phase 1: everything newer than the cache, or the newest `limit`
    // messages on a cold cache.
    let mut newest_seen = newest_cached;
    fetch_recent(
        session,
        state,
        folder,
        &mut reconciler,
        &mut newest_seen,
        summary.exists,
        limit,
        &mut on_block,
    )
    .await?;

    // Phase 2: flags-only probe of older cached messages still in budget.
    let probe = reconciler.probe_set();
    if !probe.is_empty() {
        let uids: Vec<u32> = probe
            .iter()
            .filter_map(|t| match t.uid() {
                ProviderUid::Imap(uid) => Some(*uid),
                _ => None,
            })
            .collect();
        let probed = session
            .fetch(SequenceSet::of(&uids), FetchItems::Flags, true, &mut on_block)
            .await?;

        let mut confirmed = Vec::new();
        let mut flag_reports: Vec<(MessageToken, MessageFlags)> = Vec::new();
        let mut unknown: Vec<u32> = Vec::new();
        for (seq, data) in &probed {
            let Some(uid) = data.uid else { continue };
            let token = MessageToken::with_index(folder, ProviderUid::Imap(uid.0), seq.0);
            state.insert(seq.0, token.clone());
            if reconciler.is_new_to_cache(token.uid()) {
                // Phase 4 input: referenced but never cached.
                unknown.push(uid.0);
            } else {
                if let Some(flags) = &data.flags {
                    flag_reports.push((token.clone(), MessageFlags::from_imap(flags)));
                }
                confirmed.push(token);
            }
        }
        reconciler.confirm_survivors(confirmed);

        for (token, flags) in flag_reports {
            if !reconciler.is_orphan(token.uid()) {
                let mut message = FolderMessage::new(token);
                message.flags = flags;
                reconciler.observe_updated(message);
            }
        }

        // Phase 4: full fetch for genuinely new references.
        if !unknown.is_empty() {
            let fetched = session
                .fetch(
                    SequenceSet::of(&unknown),
                    FetchItems::Summary,
                    true,
                    &mut on_block,
                )
                .await?;
            for (seq, data) in fetched {
                if let Some(message) = into_message(folder, seq.0, &data) {
                    state.insert(seq.0, message.token.clone());
                    reconciler.observe_fetched(message);
                }
            }
        }
    }

    // Phase 6: a push raced the refresh; look once more before closing.
    if recheck_new_mail {
        let exists = state.counters().exists;
        fetch_recent(
            session,
            state,
            folder,
            &mut reconciler,
            &mut newest_seen,
            exists,
            limit,
            &mut on_block,
        )
        .await?;
    }

    Ok(reconciler.finish())
}

#[allow(clippy::too_many_arguments)]
async fn fetch_recent<S>(
    session: &mut ImapSession<S>,
    state: &mut MailboxState,
    folder: &str,
    reconciler: &mut Reconciler,
    newest_seen: &mut Option<u32>,
    exists: u32,
    limit: usize,
    on_block: &mut impl FnMut(u64),
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if exists == 0 {
        return Ok(());
    }
    let (set, uid_fetch) = match *newest_seen {
        Some(newest) => (SequenceSet::from_to_end(newest + 1), true),
        None => {
            let span = u32::try_from(limit).unwrap_or(u32::MAX).min(exists);
            (SequenceSet::range(exists - span + 1, exists), false)
        }
    };

    let fetched = session
        .fetch(set, FetchItems::Summary, uid_fetch, &mut *on_block)
        .await?;
    for (seq, data) in fetched {
        let Some(message) = into_message(folder, seq.0, &data) else {
            continue;
        };
        // `n:*` yields the last message even when nothing is newer.
        if let (Some(newest), ProviderUid::Imap(uid)) = (*newest_seen, message.token.uid())
            && *uid <= newest
        {
            continue;
        }
        if let ProviderUid::Imap(uid) = message.token.uid() {
            let bumped = newest_seen.is_none_or(|n| *uid > n);
            if bumped {
                *newest_seen = Some(*uid);
            }
        }
        state.insert(seq.0, message.token.clone());
        reconciler.observe_fetched(message);
    }
    Ok(())
}

fn newest_cached_uid(cached: &[MessageToken]) -> Option<u32> {
    cached
        .iter()
        .filter_map(|t| match t.uid() {
            ProviderUid::Imap(uid) => Some(*uid),
            _ => None,
        })
        .max()
}

/// Converts a summary FETCH record; rows without a UID are dropped.
fn into_message(folder: &str, seq: u32, data: &FetchData) -> Option<FolderMessage> {
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mailwire_imap::ImapSession;
    use tokio_test::io::Builder;

    fn greeted(builder: &mut Builder) -> &mut Builder {
        builder.read(b"* OK ready\r\n")
    }

    #[tokio::test]
    async fn cold_cache_refresh_fetches_newest_window() {
        let mut builder = Builder::new();
        greeted(&mut builder)
            .write(b"A0 SELECT INBOX\r\n")
            .read(b"* 2 EXISTS\r\n* 0 RECENT\r\n* OK [UIDVALIDITY 9] ok\r\n* OK [UIDNEXT 12] ok\r\nA0 OK done\r\n")
            .write(b"A1 FETCH 1:2 (FLAGS UID ENVELOPE RFC822.SIZE)\r\n")
            .read(b"* 1 FETCH (UID 10 FLAGS (\\Seen) RFC822.SIZE 100)\r\n* 2 FETCH (UID 11 FLAGS () RFC822.SIZE 200)\r\nA1 OK done\r\n");

        let mut session = ImapSession::new(builder.build());
        session.greeting().await.unwrap();

        let mut state = MailboxState::new();
        let outcome = refresh(&mut session, &mut state, "INBOX", Vec::new(), 100, false, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.added.len(), 2);
        assert!(outcome.evicted.is_empty());
        assert_eq!(state.len(), 2);
        assert_eq!(outcome.added[0].size, 100);
        assert!(outcome.added[0].flags.seen);
    }

    #[tokio::test]
    async fn warm_cache_probes_and_evicts_gone_messages() {
        let mut builder = Builder::new();
        greeted(&mut builder)
            .write(b"A0 SELECT INBOX\r\n")
            .read(b"* 2 EXISTS\r\n* OK [UIDVALIDITY 9] ok\r\n* OK [UIDNEXT 31] ok\r\nA0 OK done\r\n")
            .write(b"A1 UID FETCH 21:* (FLAGS UID ENVELOPE RFC822.SIZE)\r\n")
            .read(b"* 2 FETCH (UID 30 FLAGS () RFC822.SIZE 10)\r\nA1 OK done\r\n")
            .write(b"A2 UID FETCH 10,20 (FLAGS UID)\r\n")
            // UID 10 is gone server-side; only 20 answers.
            .read(b"* 1 FETCH (UID 20 FLAGS (\\Seen))\r\nA2 OK done\r\n");

        let mut session = ImapSession::new(builder.build());
        session.greeting().await.unwrap();

        let cached = vec![
            MessageToken::new("INBOX", ProviderUid::Imap(10)),
            MessageToken::new("INBOX", ProviderUid::Imap(20)),
        ];
        let mut state = MailboxState::new();
        let outcome = refresh(&mut session, &mut state, "INBOX", cached, 100, false, |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.added[0].token.uid(), &ProviderUid::Imap(30));
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(outcome.evicted[0].uid(), &ProviderUid::Imap(10));
        // Survivor's flags came back from the probe.
        assert_eq!(outcome.updated.len(), 1);
        assert!(outcome.updated[0].flags.seen);
    }
}
