//! POP3 driver for the folder-refresh reconciliation.
//!
//! POP3 has no incremental change reporting, but UIDL returns the complete
//! message-number to UID map in one round trip, so phase one observes the
//! whole maildrop and the flags-only probe degenerates to set membership.

use mailwire_pop3::{HeaderBlock, Pop3Session};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;
use crate::message::{FolderMessage, MessageEnvelope};
use crate::refresh::{Reconciler, RefreshOutcome};
use crate::token::{MessageToken, ProviderUid};

/// Runs one refresh pass against a live POP3 session.
///
/// `folder` names the cache folder the maildrop is mirrored into. New
/// messages get their headers fetched with TOP, newest first, until the
/// retention budget is spent.
pub async fn refresh<S>(
    session: &mut Pop3Session<S>,
    folder: &str,
    cached: Vec<MessageToken>,
    limit: usize,
    mut on_block: impl FnMut(u64),
) -> Result<RefreshOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut listing = session.uidl().await?;
    let sizes: std::collections::HashMap<u32, u32> = session
        .list()
        .await?
        .into_iter()
        // Engine-wide sizes are u32; a wider LIST figure saturates.
        .map(|item| (item.msg, u32::try_from(item.size).unwrap_or(u32::MAX)))
        .collect();

    let mut reconciler = Reconciler::new(cached, limit, false);

    // Newest first, so the budget goes to recent mail.
    listing.sort_by(|a, b| b.msg.cmp(&a.msg));

    let mut confirmed = Vec::new();
    for item in listing {
        let uid = ProviderUid::Pop(item.uid.clone());
        let token = MessageToken::with_index(folder, uid.clone(), item.msg);
        if reconciler.is_new_to_cache(&uid) {
            if reconciler.remaining_budget() == 0 {
                continue;
            }
            let raw = session.top(item.msg, 0).await?;
            on_block(session.bytes_received());
            let headers = HeaderBlock::parse(&raw);
            let mut message = FolderMessage::new(token);
            message.envelope = MessageEnvelope::from_headers(&headers.to_summary());
            message.size = sizes.get(&item.msg).copied().unwrap_or(0);
            reconciler.observe_fetched(message);
        } else {
            confirmed.push(token);
        }
    }
    reconciler.confirm_survivors(confirmed);

    Ok(reconciler.finish())
}
