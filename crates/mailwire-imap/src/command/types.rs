//! Command types and their wire serialization.

use crate::types::{Flags, SequenceSet};

/// Data items requested by a FETCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItems {
    /// `(FLAGS UID)` — the cheap probe used during refresh.
    Flags,
    /// `(FLAGS UID ENVELOPE RFC822.SIZE)` — enough for a message list row.
    Summary,
    /// `(UID BODYSTRUCTURE)`
    Structure,
    /// `BODY[<address>]` for one part.
    Section(String),
    /// `BODY[]` — the complete raw message.
    FullBody,
}

impl FetchItems {
    fn write(&self, out: &mut String) {
        match self {
            Self::Flags => out.push_str("(FLAGS UID)"),
            Self::Summary => out.push_str("(FLAGS UID ENVELOPE RFC822.SIZE)"),
            Self::Structure => out.push_str("(UID BODYSTRUCTURE)"),
            Self::Section(address) => {
                out.push_str("(UID BODY[");
                out.push_str(address);
                out.push_str("])");
            }
            Self::FullBody => out.push_str("(UID BODY[])"),
        }
    }
}

/// Flag mutation direction for STORE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreAction {
    Add,
    Remove,
}

/// A client command ready for tagging and serialization.
///
/// Mailbox names are expected in wire form (modified UTF-7) already; the
/// session layer owns the human-name conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login {
        username: String,
        password: String,
    },
    Logout,
    Capability,
    Noop,
    StartTls,
    Namespace,
    Select {
        mailbox: String,
    },
    Close,
    Status {
        mailbox: String,
    },
    List {
        reference: String,
        pattern: String,
    },
    Lsub {
        reference: String,
        pattern: String,
    },
    Fetch {
        set: SequenceSet,
        items: FetchItems,
        uid: bool,
    },
    Store {
        set: SequenceSet,
        action: StoreAction,
        flags: Flags,
        uid: bool,
    },
    Copy {
        set: SequenceSet,
        mailbox: String,
        uid: bool,
    },
    /// The header line of an APPEND; the raw message bytes follow after the
    /// server's `+` continuation.
    Append {
        mailbox: String,
        flags: Flags,
        size: usize,
    },
    Idle,
}

impl Command {
    /// Serializes the command with its tag into one CRLF-terminated line.
    #[must_use]
    pub fn serialize(&self, tag: &str) -> String {
        let mut out = String::with_capacity(64);
        out.push_str(tag);
        out.push(' ');
        self.write_body(&mut out);
        out.push_str("\r\n");
        out
    }

    fn write_body(&self, out: &mut String) {
        match self {
            Self::Login { username, password } => {
                out.push_str("LOGIN ");
                write_quoted(out, username);
                out.push(' ');
                write_quoted(out, password);
            }
            Self::Logout => out.push_str("LOGOUT"),
            Self::Capability => out.push_str("CAPABILITY"),
            Self::Noop => out.push_str("NOOP"),
            Self::StartTls => out.push_str("STARTTLS"),
            Self::Namespace => out.push_str("NAMESPACE"),
            Self::Select { mailbox } => {
                out.push_str("SELECT ");
                write_astring(out, mailbox);
            }
            Self::Close => out.push_str("CLOSE"),
            Self::Status { mailbox } => {
                out.push_str("STATUS ");
                write_astring(out, mailbox);
                out.push_str(" (MESSAGES RECENT UNSEEN)");
            }
            Self::List { reference, pattern } => {
                out.push_str("LIST ");
                write_quoted(out, reference);
                out.push(' ');
                write_quoted(out, pattern);
            }
            Self::Lsub { reference, pattern } => {
                out.push_str("LSUB ");
                write_quoted(out, reference);
                out.push(' ');
                write_quoted(out, pattern);
            }
            Self::Fetch { set, items, uid } => {
                if *uid {
                    out.push_str("UID ");
                }
                out.push_str("FETCH ");
                out.push_str(set.as_str());
                out.push(' ');
                items.write(out);
            }
            Self::Store {
                set,
                action,
                flags,
                uid,
            } => {
                if *uid {
                    out.push_str("UID ");
                }
                out.push_str("STORE ");
                out.push_str(set.as_str());
                match action {
                    StoreAction::Add => out.push_str(" +FLAGS ("),
                    StoreAction::Remove => out.push_str(" -FLAGS ("),
                }
                write_flags(out, flags);
                out.push(')');
            }
            Self::Copy { set, mailbox, uid } => {
                if *uid {
                    out.push_str("UID ");
                }
                out.push_str("COPY ");
                out.push_str(set.as_str());
                out.push(' ');
                write_astring(out, mailbox);
            }
            Self::Append {
                mailbox,
                flags,
                size,
            } => {
                out.push_str("APPEND ");
                write_astring(out, mailbox);
                if !flags.is_empty() {
                    out.push_str(" (");
                    write_flags(out, flags);
                    out.push(')');
                }
                out.push_str(&format!(" {{{size}}}"));
            }
            Self::Idle => out.push_str("IDLE"),
        }
    }
}

fn write_flags(out: &mut String, flags: &Flags) {
    let mut first = true;
    for flag in flags.iter() {
        if !first {
            out.push(' ');
        }
        first = false;
        out.push_str(flag.as_imap());
    }
}

/// Writes a quoted string with IMAP escaping.
fn write_quoted(out: &mut String, value: &str) {
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

/// Writes an astring: bare when it scans as a single safe atom, quoted
/// otherwise. INBOX and friends go bare, names with spaces get quotes.
fn write_astring(out: &mut String, value: &str) {
    let bare = !value.is_empty()
        && value.bytes().all(|b| {
            b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b'&' | b'+' | b'#')
        });
    if bare {
        out.push_str(value);
    } else {
        write_quoted(out, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Flag;

    #[test]
    fn login_quotes_credentials() {
        let cmd = Command::Login {
            username: "user@example.com".to_string(),
            password: r#"p"w\d"#.to_string(),
        };
        assert_eq!(
            cmd.serialize("A0"),
            "A0 LOGIN \"user@example.com\" \"p\\\"w\\\\d\"\r\n"
        );
    }

    #[test]
    fn select_bare_and_quoted() {
        let plain = Command::Select {
            mailbox: "INBOX".to_string(),
        };
        assert_eq!(plain.serialize("A1"), "A1 SELECT INBOX\r\n");

        let spaced = Command::Select {
            mailbox: "Sent Items".to_string(),
        };
        assert_eq!(spaced.serialize("A2"), "A2 SELECT \"Sent Items\"\r\n");
    }

    #[test]
    fn uid_fetch_flags() {
        let cmd = Command::Fetch {
            set: SequenceSet::from_to_end(1),
            items: FetchItems::Flags,
            uid: true,
        };
        assert_eq!(cmd.serialize("A3"), "A3 UID FETCH 1:* (FLAGS UID)\r\n");
    }

    #[test]
    fn store_add_flags() {
        let cmd = Command::Store {
            set: SequenceSet::single(42),
            action: StoreAction::Add,
            flags: std::iter::once(Flag::Seen).collect(),
            uid: true,
        };
        assert_eq!(cmd.serialize("A4"), "A4 UID STORE 42 +FLAGS (\\Seen)\r\n");
    }

    #[test]
    fn append_header_carries_literal_size() {
        let cmd = Command::Append {
            mailbox: "Drafts".to_string(),
            flags: std::iter::once(Flag::Draft).collect(),
            size: 310,
        };
        assert_eq!(
            cmd.serialize("A5"),
            "A5 APPEND Drafts (\\Draft) {310}\r\n"
        );
    }

    #[test]
    fn section_fetch_addresses_part() {
        let cmd = Command::Fetch {
            set: SequenceSet::single(7),
            items: FetchItems::Section("2.1".to_string()),
            uid: true,
        };
        assert_eq!(cmd.serialize("A6"), "A6 UID FETCH 7 (UID BODY[2.1])\r\n");
    }
}
