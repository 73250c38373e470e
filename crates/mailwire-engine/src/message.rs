//! Cached message model.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use mailwire_imap::{Envelope, Flag, Flags};
use mailwire_pop3::HeaderSummary;

use crate::token::MessageToken;

/// Protocol-independent message flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    /// Message has been read.
    pub seen: bool,
    /// Message has been replied to.
    pub answered: bool,
    /// Message is starred/flagged.
    pub flagged: bool,
    /// Message is marked for deletion.
    pub deleted: bool,
    /// Message is a draft.
    pub draft: bool,
    /// Message arrived since the last session.
    pub recent: bool,
    /// Message has been forwarded (keyword flag).
    pub forwarded: bool,
}

impl MessageFlags {
    /// Maps an IMAP flag set onto the protocol-independent form.
    #[must_use]
    pub fn from_imap(flags: &Flags) -> Self {
        let mut out = Self::default();
        for flag in flags.iter() {
            match flag {
                Flag::Seen => out.seen = true,
                Flag::Answered => out.answered = true,
                Flag::Flagged => out.flagged = true,
                Flag::Deleted => out.deleted = true,
                Flag::Draft => out.draft = true,
                Flag::Recent => out.recent = true,
                Flag::Keyword(k) if k.eq_ignore_ascii_case("$Forwarded") => {
                    out.forwarded = true;
                }
                Flag::Keyword(_) => {}
            }
        }
        out
    }
}

/// Envelope summary for one message-list row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Sender display string.
    pub from: Option<String>,
    /// Recipient display string.
    pub to: Option<String>,
    /// Cc display string.
    pub cc: Option<String>,
    /// Reply-To display string.
    pub reply_to: Option<String>,
    /// Subject.
    pub subject: Option<String>,
    /// Message date, when parseable.
    pub date: Option<DateTime<FixedOffset>>,
    /// Message-ID header.
    pub message_id: Option<String>,
    /// In-Reply-To header.
    pub in_reply_to: Option<String>,
}

impl MessageEnvelope {
    /// Builds a summary from a parsed IMAP ENVELOPE.
    #[must_use]
    pub fn from_imap(envelope: &Envelope) -> Self {
        Self {
            from: join_addresses(&envelope.from),
            to: join_addresses(&envelope.to),
            cc: join_addresses(&envelope.cc),
            reply_to: join_addresses(&envelope.reply_to),
            subject: envelope.subject.clone(),
            date: envelope
                .date
                .as_deref()
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok()),
            message_id: envelope.message_id.clone(),
            in_reply_to: envelope.in_reply_to.clone(),
        }
    }

    /// Builds a summary from a POP3 header block.
    #[must_use]
    pub fn from_headers(summary: &HeaderSummary) -> Self {
        Self {
            from: summary.from.clone(),
            to: summary.to.clone(),
            cc: summary.cc.clone(),
            reply_to: summary.reply_to.clone(),
            subject: summary.subject.clone(),
            date: summary.date,
            message_id: summary.message_id.clone(),
            in_reply_to: summary.in_reply_to.clone(),
        }
    }
}

fn join_addresses(addresses: &[mailwire_imap::Address]) -> Option<String> {
    if addresses.is_empty() {
        return None;
    }
    Some(
        addresses
            .iter()
            .map(mailwire_imap::Address::display)
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// One message as cached for a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderMessage {
    /// Identity handle.
    pub token: MessageToken,
    /// Envelope summary.
    pub envelope: MessageEnvelope,
    /// Current flags.
    pub flags: MessageFlags,
    /// Size in octets; 0 when the server did not report one.
    pub size: u32,
}

impl FolderMessage {
    /// Creates a message with an empty envelope and default flags.
    #[must_use]
    pub fn new(token: MessageToken) -> Self {
        Self {
            token,
            envelope: MessageEnvelope::default(),
            flags: MessageFlags::default(),
            size: 0,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mailwire_imap::Address;

    #[test]
    fn imap_flags_map_over() {
        let flags: Flags = [
            Flag::Seen,
            Flag::Keyword("$Forwarded".to_string()),
            Flag::Keyword("custom".to_string()),
        ]
        .into_iter()
        .collect();
        let mapped = MessageFlags::from_imap(&flags);
        assert!(mapped.seen);
        assert!(mapped.forwarded);
        assert!(!mapped.deleted);
    }

    #[test]
    fn envelope_joins_addresses_and_parses_date() {
        let envelope = Envelope {
            date: Some("Mon, 1 Jan 2024 10:00:00 +0000".to_string()),
            subject: Some("hello".to_string()),
            from: vec![
                Address {
                    name: Some("Ann".to_string()),
                    mailbox: Some("ann".to_string()),
                    host: Some("example.com".to_string()),
                },
                Address {
                    name: None,
                    mailbox: Some("bob".to_string()),
                    host: Some("example.org".to_string()),
                },
            ],
            ..Envelope::default()
        };
        let summary = MessageEnvelope::from_imap(&envelope);
        assert_eq!(summary.from.as_deref(), Some("Ann, bob@example.org"));
        assert!(summary.date.is_some());
    }
}
