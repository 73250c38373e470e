//! Core IMAP protocol types.
//!
//! Identifiers here are plain `u32` newtypes rather than `NonZero` wrappers:
//! the engine's policy is that counters missing from a server reply degrade
//! to the `0` sentinel instead of failing the listing, so zero must be
//! representable.

use std::collections::HashSet;
use std::fmt;

/// Message UID, stable within a mailbox for a given `UIDVALIDITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Uid(pub u32);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based message sequence index; shifts on expunge, unlike [`Uid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SeqNum(pub u32);

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A standard or keyword message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    /// `\Seen`
    Seen,
    /// `\Answered`
    Answered,
    /// `\Flagged`
    Flagged,
    /// `\Deleted`
    Deleted,
    /// `\Draft`
    Draft,
    /// `\Recent`
    Recent,
    /// Any other atom, including custom keywords.
    Keyword(String),
}

impl Flag {
    /// Parses a flag atom as it appears on the wire.
    #[must_use]
    pub fn parse(atom: &str) -> Self {
        match atom.to_ascii_uppercase().as_str() {
            "\\SEEN" => Self::Seen,
            "\\ANSWERED" => Self::Answered,
            "\\FLAGGED" => Self::Flagged,
            "\\DELETED" => Self::Deleted,
            "\\DRAFT" => Self::Draft,
            "\\RECENT" => Self::Recent,
            _ => Self::Keyword(atom.to_string()),
        }
    }

    /// Returns the wire form of the flag.
    #[must_use]
    pub fn as_imap(&self) -> &str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
            Self::Keyword(s) => s,
        }
    }
}

/// An ordered set of message flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Flags(Vec<Flag>);

impl Flags {
    /// Creates an empty flag set.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a flag if not already present.
    pub fn insert(&mut self, flag: Flag) {
        if !self.0.contains(&flag) {
            self.0.push(flag);
        }
    }

    /// Returns true if the flag is present.
    #[must_use]
    pub fn contains(&self, flag: &Flag) -> bool {
        self.0.contains(flag)
    }

    /// Iterates over the flags.
    pub fn iter(&self) -> impl Iterator<Item = &Flag> {
        self.0.iter()
    }

    /// Returns true if no flags are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Flag> for Flags {
    fn from_iter<T: IntoIterator<Item = Flag>>(iter: T) -> Self {
        let mut flags = Self::new();
        for f in iter {
            flags.insert(f);
        }
        flags
    }
}

/// Server capability set, parsed from `CAPABILITY` data.
///
/// Stored as uppercased atoms; lookup is case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(HashSet<String>);

impl CapabilitySet {
    /// Creates an empty capability set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from whitespace-separated capability atoms.
    #[must_use]
    pub fn from_atoms<'a>(atoms: impl IntoIterator<Item = &'a str>) -> Self {
        Self(
            atoms
                .into_iter()
                .map(str::to_ascii_uppercase)
                .collect::<HashSet<_>>(),
        )
    }

    /// Returns true if the named capability was advertised.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.0.contains(&name.to_ascii_uppercase())
    }

    /// Returns true if the server advertises `IDLE` (RFC 2177).
    #[must_use]
    pub fn supports_idle(&self) -> bool {
        self.has("IDLE")
    }

    /// Returns true if the server advertises `STARTTLS`.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.has("STARTTLS")
    }

    /// Returns true if the server advertises `NAMESPACE` (RFC 2342).
    #[must_use]
    pub fn supports_namespace(&self) -> bool {
        self.has("NAMESPACE")
    }

    /// Returns true if the set is empty (no CAPABILITY seen yet).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Mailbox attribute from a LIST/LSUB reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailboxAttr {
    /// `\Noselect` — mailbox cannot be selected.
    NoSelect,
    /// `\Noinferiors` — mailbox cannot have children.
    NoInferiors,
    /// `\HasChildren`
    HasChildren,
    /// `\HasNoChildren`
    HasNoChildren,
    /// `\Marked`
    Marked,
    /// `\Unmarked`
    Unmarked,
    /// Anything else the server sent.
    Other(String),
}

impl MailboxAttr {
    /// Parses a LIST attribute atom.
    #[must_use]
    pub fn parse(atom: &str) -> Self {
        match atom.to_ascii_uppercase().as_str() {
            "\\NOSELECT" => Self::NoSelect,
            "\\NOINFERIORS" => Self::NoInferiors,
            "\\HASCHILDREN" => Self::HasChildren,
            "\\HASNOCHILDREN" => Self::HasNoChildren,
            "\\MARKED" => Self::Marked,
            "\\UNMARKED" => Self::Unmarked,
            _ => Self::Other(atom.to_string()),
        }
    }
}

/// One mailbox line from a LIST or LSUB reply.
///
/// `name` is the raw wire name (modified UTF-7); decode with
/// [`crate::utf7::decode`] before using it for display or map keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Mailbox attributes.
    pub attrs: Vec<MailboxAttr>,
    /// Hierarchy delimiter, if the mailbox has one.
    pub delimiter: Option<char>,
    /// Raw (encoded) mailbox name.
    pub name: String,
}

impl ListEntry {
    /// Returns true if the mailbox can be selected.
    #[must_use]
    pub fn selectable(&self) -> bool {
        !self.attrs.contains(&MailboxAttr::NoSelect)
    }
}

/// Counters from a SELECT/EXAMINE exchange.
///
/// Fields the server did not report stay at the `0` sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectSummary {
    /// `* n EXISTS`
    pub exists: u32,
    /// `* n RECENT`
    pub recent: u32,
    /// `[UNSEEN n]`
    pub unseen: u32,
    /// `[UIDVALIDITY n]`
    pub uid_validity: u32,
    /// `[UIDNEXT n]`
    pub uid_next: u32,
    /// Whether the mailbox was opened read-only.
    pub read_only: bool,
}

/// Counters from a STATUS reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    /// `MESSAGES`
    pub messages: u32,
    /// `RECENT`
    pub recent: u32,
    /// `UNSEEN`
    pub unseen: u32,
    /// `UIDNEXT`
    pub uid_next: u32,
    /// `UIDVALIDITY`
    pub uid_validity: u32,
}

/// One address from an ENVELOPE address list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    /// Display name.
    pub name: Option<String>,
    /// Local part.
    pub mailbox: Option<String>,
    /// Domain part.
    pub host: Option<String>,
}

impl Address {
    /// Formats the address as `name` or `mailbox@host`.
    #[must_use]
    pub fn display(&self) -> String {
        if let Some(name) = &self.name
            && !name.is_empty()
        {
            return name.clone();
        }
        match (&self.mailbox, &self.host) {
            (Some(m), Some(h)) => format!("{m}@{h}"),
            (Some(m), None) => m.clone(),
            _ => String::new(),
        }
    }
}

/// Parsed ENVELOPE structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// `Date:` header as sent.
    pub date: Option<String>,
    /// `Subject:` header.
    pub subject: Option<String>,
    /// `From:` addresses.
    pub from: Vec<Address>,
    /// `Reply-To:` addresses.
    pub reply_to: Vec<Address>,
    /// `To:` addresses.
    pub to: Vec<Address>,
    /// `Cc:` addresses.
    pub cc: Vec<Address>,
    /// `In-Reply-To:` header.
    pub in_reply_to: Option<String>,
    /// `Message-ID:` header.
    pub message_id: Option<String>,
}

/// A sequence-number or UID set for FETCH/STORE/COPY commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(String);

impl SequenceSet {
    /// A single number.
    #[must_use]
    pub fn single(n: u32) -> Self {
        Self(n.to_string())
    }

    /// An inclusive range `lo:hi`.
    #[must_use]
    pub fn range(lo: u32, hi: u32) -> Self {
        Self(format!("{lo}:{hi}"))
    }

    /// A range from `lo` to the highest message (`lo:*`).
    #[must_use]
    pub fn from_to_end(lo: u32) -> Self {
        Self(format!("{lo}:*"))
    }

    /// An explicit comma-separated set. Empty input yields `0`, which no
    /// server will match; callers should avoid issuing empty sets.
    #[must_use]
    pub fn of(numbers: &[u32]) -> Self {
        if numbers.is_empty() {
            return Self("0".to_string());
        }
        let joined = numbers
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Self(joined)
    }

    /// Wire form of the set.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn flag_parse_is_case_insensitive() {
        assert_eq!(Flag::parse("\\seen"), Flag::Seen);
        assert_eq!(Flag::parse("\\SEEN"), Flag::Seen);
        assert_eq!(Flag::parse("$Forwarded"), Flag::Keyword("$Forwarded".to_string()));
    }

    #[test]
    fn flags_insert_deduplicates() {
        let mut flags = Flags::new();
        flags.insert(Flag::Seen);
        flags.insert(Flag::Seen);
        assert_eq!(flags.iter().count(), 1);
    }

    #[test]
    fn capability_lookup_ignores_case() {
        let caps = CapabilitySet::from_atoms(["IMAP4rev1", "idle", "StartTLS"]);
        assert!(caps.supports_idle());
        assert!(caps.supports_starttls());
        assert!(!caps.supports_namespace());
        assert!(caps.has("imap4rev1"));
    }

    #[test]
    fn sequence_set_formats() {
        assert_eq!(SequenceSet::single(7).as_str(), "7");
        assert_eq!(SequenceSet::range(1, 10).as_str(), "1:10");
        assert_eq!(SequenceSet::from_to_end(55).as_str(), "55:*");
        assert_eq!(SequenceSet::of(&[3, 5, 9]).as_str(), "3,5,9");
    }

    #[test]
    fn list_entry_selectable() {
        let entry = ListEntry {
            attrs: vec![MailboxAttr::NoSelect],
            delimiter: Some('/'),
            name: "[Gmail]".to_string(),
        };
        assert!(!entry.selectable());
    }
}
