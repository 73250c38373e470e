//! Selected-mailbox state reconciliation.
//!
//! The server and the client each hold a view of the selected mailbox, and
//! the server's can mutate at any time (new mail, other clients expunging).
//! [`MailboxState`] is the client's authoritative index↔token mapping and
//! the reconciliation rules that keep it honest: a validity predicate
//! checked on every SELECT, in-place shifting on EXPUNGE, and a
//! wipe-and-reseed recovery path when a FETCH contradicts the map.

use std::collections::{BTreeMap, HashMap};

use mailwire_imap::SelectSummary;

use crate::token::{MessageToken, ProviderUid};

/// Counters from the last SELECT of this mailbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxCounters {
    /// `EXISTS`
    pub exists: u32,
    /// `RECENT`
    pub recent: u32,
    /// `UNSEEN`
    pub unseen: u32,
    /// `UIDNEXT`
    pub uid_next: u32,
    /// `UIDVALIDITY`
    pub uid_validity: u32,
}

impl From<SelectSummary> for MailboxCounters {
    fn from(s: SelectSummary) -> Self {
        Self {
            exists: s.exists,
            recent: s.recent,
            unseen: s.unseen,
            uid_next: s.uid_next,
            uid_validity: s.uid_validity,
        }
    }
}

/// Report of one EXPUNGE application.
#[derive(Debug, Clone, Default)]
pub struct ExpungeReport {
    /// The token removed at the expunged index, if it was mapped.
    pub expunged: Option<MessageToken>,
    /// Tokens whose index shifted down, with their new indices already
    /// applied. Distinct from `expunged`: these messages still exist.
    pub updated: Vec<MessageToken>,
}

/// Index↔token map and counters for the currently selected mailbox.
///
/// Owned exclusively by the account's worker task; reads from elsewhere go
/// through snapshots published on the state channel.
#[derive(Debug, Default)]
pub struct MailboxState {
    counters: MailboxCounters,
    by_index: BTreeMap<u32, MessageToken>,
    by_uid: HashMap<ProviderUid, u32>,
}

impl MailboxState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters from the last SELECT.
    #[must_use]
    pub const fn counters(&self) -> &MailboxCounters {
        &self.counters
    }

    /// Number of mapped messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_index.len()
    }

    /// True when no messages are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }

    /// Token currently mapped at a sequence index.
    #[must_use]
    pub fn token_at(&self, index: u32) -> Option<&MessageToken> {
        self.by_index.get(&index)
    }

    /// Index currently mapped for a provider UID.
    #[must_use]
    pub fn index_of(&self, uid: &ProviderUid) -> Option<u32> {
        self.by_uid.get(uid).copied()
    }

    /// The validity predicate: whether the index map survives a re-SELECT
    /// reporting `summary`.
    ///
    /// True iff UIDVALIDITY is unchanged and either nothing moved, or
    /// EXISTS and UIDNEXT both grew by the identical positive delta (pure
    /// appends). Any other combination means messages were removed or
    /// renumbered behind our back.
    #[must_use]
    pub fn index_map_still_valid(&self, summary: &SelectSummary) -> bool {
        let old = &self.counters;
        if old.uid_validity != summary.uid_validity {
            return false;
        }
        if old.exists == summary.exists && old.uid_next == summary.uid_next {
            return true;
        }
        let exists_delta = i64::from(summary.exists) - i64::from(old.exists);
        let uid_next_delta = i64::from(summary.uid_next) - i64::from(old.uid_next);
        exists_delta > 0 && exists_delta == uid_next_delta
    }

    /// Applies a SELECT result.
    ///
    /// Returns true when the existing index map was retained. On false the
    /// map has been purged and the caller must treat every displayed
    /// message as needing a flags re-fetch.
    pub fn apply_select(&mut self, summary: &SelectSummary) -> bool {
        let valid = self.index_map_still_valid(summary);
        if !valid && !self.by_index.is_empty() {
            tracing::debug!(
                uid_validity = summary.uid_validity,
                exists = summary.exists,
                "index map invalidated by select"
            );
            self.by_index.clear();
            self.by_uid.clear();
        }
        self.counters = (*summary).into();
        valid
    }

    /// Wipes the map and fills it from scratch.
    pub fn seed(&mut self, tokens: impl IntoIterator<Item = (u32, MessageToken)>) {
        self.by_index.clear();
        self.by_uid.clear();
        for (index, mut token) in tokens {
            token.update_index(index);
            self.by_uid.insert(token.uid().clone(), index);
            self.by_index.insert(index, token);
        }
    }

    /// Inserts or replaces one mapping.
    ///
    /// For fetches the worker itself asked for, where the map is being
    /// built up and gaps are expected. Unsolicited fetches go through
    /// [`Self::record_fetch`] instead, which treats disagreement as a
    /// desync.
    pub fn insert(&mut self, index: u32, mut token: MessageToken) {
        if let Some(previous) = self.by_index.get(&index) {
            self.by_uid.remove(previous.uid());
        }
        token.update_index(index);
        self.by_uid.insert(token.uid().clone(), index);
        self.by_index.insert(index, token);
    }

    /// Applies an untagged EXPUNGE of sequence index `index`.
    ///
    /// The mapped token (if any) is removed; every higher index shifts
    /// down by one with its token's index field updated in place. Shifted
    /// tokens are reported so the caller can persist the new indices.
    pub fn apply_expunge(&mut self, index: u32) -> ExpungeReport {
        let mut report = ExpungeReport::default();

        if let Some(token) = self.by_index.remove(&index) {
            self.by_uid.remove(token.uid());
            report.expunged = Some(token);
        }
        self.counters.exists = self.counters.exists.saturating_sub(1);

        let shifted: Vec<u32> = self
            .by_index
            .range(index + 1..)
            .map(|(&i, _)| i)
            .collect();
        for old_index in shifted {
            if let Some(mut token) = self.by_index.remove(&old_index) {
                let new_index = old_index - 1;
                token.update_index(new_index);
                self.by_uid.insert(token.uid().clone(), new_index);
                report.updated.push(token.clone());
                self.by_index.insert(new_index, token);
            }
        }

        report
    }

    /// Reconciles an incoming FETCH identity against the map.
    ///
    /// Returns false when the map already agreed (or the index was vacant
    /// and is now filled). Returns true on the desync branch: the index
    /// was absent from a non-contiguous map or mapped to a different
    /// identity, in which case nothing else in the map can be trusted —
    /// it is wiped and reseeded with only the incoming token. Desync is an
    /// internal repair, never a request failure.
    pub fn record_fetch(&mut self, index: u32, token: MessageToken) -> bool {
        match self.by_index.get(&index) {
            Some(existing) if *existing == token => {
                // Identity agrees; nothing to repair.
                false
            }
            None if self.is_contiguous_append(index) => {
                let mut token = token;
                token.update_index(index);
                self.by_uid.insert(token.uid().clone(), index);
                self.by_index.insert(index, token);
                false
            }
            mapped => {
                tracing::error!(
                    index,
                    known = ?mapped.map(MessageToken::uid),
                    incoming = %token.uid(),
                    "mailbox index map out of sync; resetting"
                );
                self.seed(std::iter::once((index, token)));
                true
            }
        }
    }

    /// True when inserting at `index` keeps the map a prefix-contiguous
    /// 1-based sequence (empty map, or exactly one past the current end).
    fn is_contiguous_append(&self, index: u32) -> bool {
        let end = self.by_index.keys().next_back().copied().unwrap_or(0);
        index == end + 1
    }

    /// All mapped tokens in index order.
    pub fn tokens(&self) -> impl Iterator<Item = &MessageToken> {
        self.by_index.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn summary(exists: u32, uid_next: u32, uid_validity: u32) -> SelectSummary {
        SelectSummary {
            exists,
            uid_next,
            uid_validity,
            ..SelectSummary::default()
        }
    }

    fn token(uid: u32) -> MessageToken {
        MessageToken::new("INBOX", ProviderUid::Imap(uid))
    }

    fn seeded(n: u32) -> MailboxState {
        let mut state = MailboxState::new();
        state.apply_select(&summary(n, n + 1, 100));
        state.seed((1..=n).map(|i| (i, token(i * 10))));
        state
    }

    #[test]
    fn validity_predicate_cases() {
        let state = seeded(10);
        // counters: exists=10, uid_next=11, uid_validity=100

        // Unchanged.
        assert!(state.index_map_still_valid(&summary(10, 11, 100)));
        // Equal positive delta (pure appends).
        assert!(state.index_map_still_valid(&summary(13, 14, 100)));
        // UIDVALIDITY changed.
        assert!(!state.index_map_still_valid(&summary(10, 11, 101)));
        // Deltas differ.
        assert!(!state.index_map_still_valid(&summary(13, 15, 100)));
        // Shrink is never valid.
        assert!(!state.index_map_still_valid(&summary(9, 11, 100)));
        // uid_next moved without exists moving.
        assert!(!state.index_map_still_valid(&summary(10, 12, 100)));
    }

    #[test]
    fn invalid_select_purges_map() {
        let mut state = seeded(3);
        assert!(!state.apply_select(&summary(3, 4, 999)));
        assert!(state.is_empty());
    }

    #[test]
    fn valid_select_retains_map() {
        let mut state = seeded(3);
        assert!(state.apply_select(&summary(5, 6, 100)));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn expunge_shifts_and_reports() {
        let mut state = seeded(5);
        let report = state.apply_expunge(2);

        assert_eq!(report.expunged.unwrap().uid(), &ProviderUid::Imap(20));
        // Tokens formerly at 3,4,5 moved to 2,3,4.
        let updated: Vec<u32> = report.updated.iter().map(MessageToken::index).collect();
        assert_eq!(updated, vec![2, 3, 4]);

        assert_eq!(state.len(), 4);
        assert_eq!(state.token_at(2).unwrap().uid(), &ProviderUid::Imap(30));
        assert_eq!(state.index_of(&ProviderUid::Imap(50)), Some(4));
        assert!(state.token_at(5).is_none());
    }

    /// Captures the desync error logs in test output.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    }

    #[test]
    fn fetch_for_missing_index_in_gapped_map_reseeds() {
        init_tracing();
        let mut state = seeded(5);
        // Make the map {1,2,3,5}.
        state.by_uid.remove(&ProviderUid::Imap(40));
        state.by_index.remove(&4);

        let desync = state.record_fetch(4, token(999));
        assert!(desync);
        assert_eq!(state.len(), 1);
        assert_eq!(state.token_at(4).unwrap().uid(), &ProviderUid::Imap(999));
    }

    #[test]
    fn fetch_with_conflicting_identity_reseeds() {
        init_tracing();
        let mut state = seeded(3);
        let desync = state.record_fetch(2, token(777));
        assert!(desync);
        assert_eq!(state.len(), 1);
        assert_eq!(state.token_at(2).unwrap().uid(), &ProviderUid::Imap(777));
    }

    #[test]
    fn fetch_matching_identity_is_quiet() {
        let mut state = seeded(3);
        assert!(!state.record_fetch(2, token(20)));
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn fetch_appending_past_end_grows_map() {
        let mut state = seeded(3);
        assert!(!state.record_fetch(4, token(40)));
        assert_eq!(state.len(), 4);
    }

    proptest! {
        /// For any expunge sequence applied to a map seeded 1..=n, the
        /// surviving index set is exactly 1..=(n-k), every token's stored
        /// index equals its map position, and the updated-token reports
        /// are exactly the tokens whose index changed.
        #[test]
        fn expunge_invariant(n in 1u32..40, picks in proptest::collection::vec(1u32..40, 0..12)) {
            let mut state = seeded(n);
            let mut applied = 0u32;

            for pick in picks {
                let remaining = n - applied;
                if remaining == 0 {
                    break;
                }
                let index = (pick % remaining) + 1;
                let before: Vec<(u32, ProviderUid)> = state
                    .by_index
                    .iter()
                    .map(|(i, t)| (*i, t.uid().clone()))
                    .collect();

                let report = state.apply_expunge(index);
                applied += 1;

                // Updated reports are exactly the shifted survivors.
                let expected_updated: Vec<ProviderUid> = before
                    .iter()
                    .filter(|(i, _)| *i > index)
                    .map(|(_, uid)| uid.clone())
                    .collect();
                let got_updated: Vec<ProviderUid> =
                    report.updated.iter().map(|t| t.uid().clone()).collect();
                prop_assert_eq!(got_updated, expected_updated);
            }

            let survivors = n - applied;
            let indices: Vec<u32> = state.by_index.keys().copied().collect();
            let expected: Vec<u32> = (1..=survivors).collect();
            prop_assert_eq!(indices, expected);

            for (i, t) in &state.by_index {
                prop_assert_eq!(*i, t.index());
                prop_assert_eq!(state.by_uid.get(t.uid()).copied(), Some(*i));
            }
        }
    }
}
