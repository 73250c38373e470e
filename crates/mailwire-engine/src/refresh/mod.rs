//! Two-phase folder-refresh reconciliation.
//!
//! Refreshing a folder means merging the server's current message set with
//! the locally cached one under a retention limit, without either losing
//! messages that still exist or keeping ones the server expunged. The
//! algorithm is split: this module holds the pure bookkeeping
//! ([`Reconciler`]), and the protocol drivers in [`imap`] and [`pop`] feed
//! it observations from the wire.
//!
//! Phases, in order:
//! 1. seed orphan candidates from the cache;
//! 2. fetch recent messages, striking each one the server reports off the
//!    candidate list while tracking the oldest message seen and the
//!    remaining retention budget;
//! 3. confirm older cached messages with a cheap flags-only probe,
//!    re-orphaning the oldest excess beyond the budget;
//! 4. fully fetch anything referenced that the cache has never seen;
//! 5. evict whatever is still a candidate.

pub mod imap;
pub mod pop;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::HashSet;

use crate::message::FolderMessage;
use crate::token::{MessageToken, ProviderUid};

/// Net result of one folder refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// Messages new to the cache, fully fetched.
    pub added: Vec<FolderMessage>,
    /// Cached messages whose flags (or index) changed.
    pub updated: Vec<FolderMessage>,
    /// Cached messages that no longer exist server-side, or fell off the
    /// retention limit. Evict from the cache.
    pub evicted: Vec<MessageToken>,
}

/// The protocol's native message-ordering comparator, oldest first.
///
/// IMAP UIDs ascend with arrival; POP3 message numbers likewise. The
/// volatile index doubles as the POP message number here.
#[must_use]
pub fn arrival_order(a: &MessageToken, b: &MessageToken) -> Ordering {
    match (a.uid(), b.uid()) {
        (ProviderUid::Imap(x), ProviderUid::Imap(y)) => x.cmp(y),
        _ => a
            .index()
            .cmp(&b.index())
            .then_with(|| a.uid().to_string().cmp(&b.uid().to_string())),
    }
}

/// Pure bookkeeping for one refresh pass.
#[derive(Debug)]
pub struct Reconciler {
    limit: usize,
    map_invalidated: bool,
    seed: HashSet<ProviderUid>,
    orphans: HashMap<ProviderUid, MessageToken>,
    fetched: Vec<FolderMessage>,
    updated: Vec<FolderMessage>,
    oldest_fetched: Option<MessageToken>,
}

impl Reconciler {
    /// Seeds the orphan-candidate set from the cache.
    ///
    /// `map_invalidated` widens the confirmation probe to every cached
    /// message, since after a purged index map nothing can be assumed to
    /// still exist.
    #[must_use]
    pub fn new(cached: Vec<MessageToken>, limit: usize, map_invalidated: bool) -> Self {
        let seed: HashSet<ProviderUid> = cached.iter().map(|t| t.uid().clone()).collect();
        let orphans = cached.into_iter().map(|t| (t.uid().clone(), t)).collect();
        Self {
            limit,
            map_invalidated,
            seed,
            orphans,
            fetched: Vec::new(),
            updated: Vec::new(),
            oldest_fetched: None,
        }
    }

    /// Retention budget left after what phase one fetched.
    #[must_use]
    pub fn remaining_budget(&self) -> usize {
        self.limit.saturating_sub(self.fetched.len())
    }

    /// True when the cache never held this message.
    #[must_use]
    pub fn is_new_to_cache(&self, uid: &ProviderUid) -> bool {
        !self.seed.contains(uid)
    }

    /// Phase one: the server reported a message, fully fetched.
    pub fn observe_fetched(&mut self, message: FolderMessage) {
        self.orphans.remove(message.token.uid());
        let replace = match &self.oldest_fetched {
            Some(oldest) => arrival_order(&message.token, oldest) == Ordering::Less,
            None => true,
        };
        if replace {
            self.oldest_fetched = Some(message.token.clone());
        }
        if self.seed.contains(message.token.uid()) {
            self.updated.push(message);
        } else {
            self.fetched.push(message);
        }
    }

    /// Phase two input: the cached messages worth a flags-only probe.
    ///
    /// Empty when the budget is spent. Otherwise: every remaining orphan
    /// candidate older than the oldest fetched message, or all candidates
    /// when the index map was invalidated or nothing was fetched.
    #[must_use]
    pub fn probe_set(&self) -> Vec<MessageToken> {
        if self.remaining_budget() == 0 {
            return Vec::new();
        }
        let mut set: Vec<MessageToken> = match (&self.oldest_fetched, self.map_invalidated) {
            (Some(oldest), false) => self
                .orphans
                .values()
                .filter(|t| arrival_order(t, oldest) == Ordering::Less)
                .cloned()
                .collect(),
            _ => self.orphans.values().cloned().collect(),
        };
        set.sort_by(arrival_order);
        set
    }

    /// Phase two result: messages the probe confirmed still exist.
    ///
    /// Confirmed survivors leave the orphan set; if more survived than the
    /// budget allows, the oldest excess is put back so eviction drops the
    /// oldest rather than whatever the probe happened to return last.
    pub fn confirm_survivors(&mut self, mut confirmed: Vec<MessageToken>) {
        confirmed.sort_by(arrival_order);
        let budget = self.remaining_budget();
        let excess = confirmed.len().saturating_sub(budget);

        for token in confirmed.drain(excess..) {
            self.orphans.remove(token.uid());
        }
        // The oldest `excess` stay in the orphan set and get evicted.
        for token in confirmed {
            self.orphans.entry(token.uid().clone()).or_insert(token);
        }
    }

    /// True while the message is still slated for eviction.
    #[must_use]
    pub fn is_orphan(&self, uid: &ProviderUid) -> bool {
        self.orphans.contains_key(uid)
    }

    /// Records a flags change for an already-cached survivor.
    pub fn observe_updated(&mut self, message: FolderMessage) {
        self.orphans.remove(message.token.uid());
        self.updated.push(message);
    }

    /// Phase five: closes the pass.
    #[must_use]
    pub fn finish(self) -> RefreshOutcome {
        let mut evicted: Vec<MessageToken> = self.orphans.into_values().collect();
        evicted.sort_by(arrival_order);
        RefreshOutcome {
            added: self.fetched,
            updated: self.updated,
            evicted,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn imap_token(uid: u32) -> MessageToken {
        MessageToken::new("INBOX", ProviderUid::Imap(uid))
    }

    fn message(uid: u32) -> FolderMessage {
        FolderMessage::new(imap_token(uid))
    }

    #[test]
    fn unchanged_cache_is_idempotent() {
        let cached: Vec<MessageToken> = (1..=4).map(|u| imap_token(u * 10)).collect();
        let mut reconciler = Reconciler::new(cached.clone(), 100, false);

        // Server reports the newest message; nothing is new to the cache.
        assert!(!reconciler.is_new_to_cache(&ProviderUid::Imap(40)));
        reconciler.observe_fetched(message(40));

        // Probe confirms every older cached message.
        let probe = reconciler.probe_set();
        assert_eq!(probe.len(), 3);
        reconciler.confirm_survivors(probe);

        let outcome = reconciler.finish();
        assert!(outcome.added.is_empty());
        assert!(outcome.evicted.is_empty());
    }

    #[test]
    fn retention_evicts_exactly_the_oldest_excess() {
        // Limit 5; 8 messages would otherwise survive (none fetched fresh,
        // all confirmed by the probe). The 3 oldest must go.
        let cached: Vec<MessageToken> = (1..=8).map(|u| imap_token(u * 10)).collect();
        let mut reconciler = Reconciler::new(cached.clone(), 5, true);

        let probe = reconciler.probe_set();
        assert_eq!(probe.len(), 8);
        reconciler.confirm_survivors(probe);

        let outcome = reconciler.finish();
        let evicted: Vec<&ProviderUid> = outcome.evicted.iter().map(MessageToken::uid).collect();
        assert_eq!(
            evicted,
            vec![
                &ProviderUid::Imap(10),
                &ProviderUid::Imap(20),
                &ProviderUid::Imap(30)
            ]
        );
    }

    #[test]
    fn fetched_messages_consume_budget() {
        let cached: Vec<MessageToken> = (1..=4).map(|u| imap_token(u * 10)).collect();
        let mut reconciler = Reconciler::new(cached, 5, false);

        // Three new messages arrive; budget drops to 2.
        for uid in [100, 110, 120] {
            assert!(reconciler.is_new_to_cache(&ProviderUid::Imap(uid)));
            reconciler.observe_fetched(message(uid));
        }
        assert_eq!(reconciler.remaining_budget(), 2);

        let probe = reconciler.probe_set();
        assert_eq!(probe.len(), 4);
        reconciler.confirm_survivors(probe);

        let outcome = reconciler.finish();
        assert_eq!(outcome.added.len(), 3);
        // Only 2 of the 4 old messages fit; the 2 oldest are evicted.
        let evicted: Vec<&ProviderUid> = outcome.evicted.iter().map(MessageToken::uid).collect();
        assert_eq!(evicted, vec![&ProviderUid::Imap(10), &ProviderUid::Imap(20)]);
    }

    #[test]
    fn probe_skipped_when_budget_spent() {
        let cached = vec![imap_token(1), imap_token(2)];
        let mut reconciler = Reconciler::new(cached, 2, false);
        reconciler.observe_fetched(message(50));
        reconciler.observe_fetched(message(51));
        assert!(reconciler.probe_set().is_empty());

        let outcome = reconciler.finish();
        assert_eq!(outcome.evicted.len(), 2);
    }

    #[test]
    fn probe_limited_to_older_than_oldest_fetched() {
        let cached = vec![imap_token(10), imap_token(30)];
        let mut reconciler = Reconciler::new(cached, 100, false);
        // Oldest fetched has UID 20, so only UID 10 needs probing.
        reconciler.observe_fetched(message(20));

        let probe = reconciler.probe_set();
        assert_eq!(probe.len(), 1);
        assert_eq!(probe[0].uid(), &ProviderUid::Imap(10));
    }

    #[test]
    fn refetched_cached_message_counts_as_update() {
        let cached = vec![imap_token(10)];
        let mut reconciler = Reconciler::new(cached, 100, false);
        reconciler.observe_fetched(message(10));

        let outcome = reconciler.finish();
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.updated.len(), 1);
        assert!(outcome.evicted.is_empty());
    }
}
