//! Top-level response grammar.

use crate::types::{
    CapabilitySet, Flag, Flags, ListEntry, MailboxAttr, SeqNum, StatusCounts, Uid,
};
use crate::{Error, Result};

use super::fetch::{self, FetchData};
use super::lexer::{Scanner, Token};

/// Command completion status from a tagged reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// `OK`
    Ok,
    /// `NO` — operation refused; connection still usable.
    No,
    /// `BAD` — command rejected as malformed.
    Bad,
}

/// Bracketed response code inside an OK/NO/BAD reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespCode {
    /// `[ALERT]`
    Alert,
    /// `[READ-ONLY]`
    ReadOnly,
    /// `[READ-WRITE]`
    ReadWrite,
    /// `[TRYCREATE]`
    TryCreate,
    /// `[UNSEEN n]`
    Unseen(u32),
    /// `[UIDVALIDITY n]`
    UidValidity(u32),
    /// `[UIDNEXT n]`
    UidNext(u32),
    /// `[PERMANENTFLAGS (...)]`
    PermanentFlags(Flags),
    /// `[CAPABILITY ...]`
    Capability(CapabilitySet),
    /// Any other code, kept verbatim.
    Other(String),
}

/// One parsed server response.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    /// Tagged command completion.
    Tagged {
        /// Echoed command tag.
        tag: String,
        /// Completion status.
        status: Completion,
        /// Optional response code.
        code: Option<RespCode>,
        /// Server's human-readable text.
        text: String,
    },
    /// `+` continuation request.
    Continuation(String),
    /// Untagged server data.
    Untagged(UntaggedResponse),
}

/// Untagged (`*`) server data.
#[derive(Debug, Clone, PartialEq)]
pub enum UntaggedResponse {
    /// `* OK [...] text`
    Ok {
        /// Optional response code.
        code: Option<RespCode>,
        /// Status text.
        text: String,
    },
    /// `* NO text`
    No {
        /// Warning text.
        text: String,
    },
    /// `* BAD text`
    Bad {
        /// Error text.
        text: String,
    },
    /// `* BYE text` — server is disconnecting.
    Bye {
        /// Farewell text.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(CapabilitySet),
    /// `* FLAGS (...)`
    Flags(Flags),
    /// `* LIST (...) delim name`
    List(ListEntry),
    /// `* LSUB (...) delim name`
    Lsub(ListEntry),
    /// `* STATUS mailbox (...)`
    Status {
        /// Raw mailbox name as echoed by the server.
        mailbox: String,
        /// Reported counters.
        counts: StatusCounts,
    },
    /// `* SEARCH n n n`
    Search(Vec<u32>),
    /// `* NAMESPACE ...` — first personal namespace entry only.
    Namespace {
        /// Personal namespace prefix.
        prefix: String,
        /// Personal hierarchy delimiter.
        delimiter: Option<char>,
    },
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(SeqNum),
    /// `* n FETCH (...)`
    Fetch {
        /// Sequence index the data applies to.
        seq: SeqNum,
        /// Parsed data items.
        data: FetchData,
    },
    /// An untagged kind this client does not interpret.
    Ignored(String),
}

impl ServerResponse {
    /// Parses one coalesced response block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] when the block does not match the response
    /// grammar. Callers doing batch parsing should log and skip rather than
    /// abort the whole listing.
    pub fn parse(block: &[u8]) -> Result<Self> {
        let mut s = Scanner::new(block);
        match s.token()? {
            Token::Star => {
                s.expect_space()?;
                parse_untagged(&mut s).map(Self::Untagged)
            }
            Token::Plus => {
                if s.peek() == Some(b' ') {
                    s.skip(1);
                }
                Ok(Self::Continuation(s.text_to_eol()))
            }
            Token::Atom(tag) => {
                let tag = tag.to_string();
                s.expect_space()?;
                let status = parse_completion(&mut s)?;
                s.expect_space()?;
                let (code, text) = parse_resp_text(&mut s)?;
                Ok(Self::Tagged {
                    tag,
                    status,
                    code,
                    text,
                })
            }
            other => Err(Error::Parse {
                position: 0,
                message: format!("expected *, + or tag, got {other:?}"),
            }),
        }
    }

    /// Returns true if this is a tagged reply carrying the given tag.
    #[must_use]
    pub fn is_tagged_for(&self, wanted: &str) -> bool {
        matches!(self, Self::Tagged { tag, .. } if tag == wanted)
    }
}

fn parse_completion(s: &mut Scanner<'_>) -> Result<Completion> {
    let atom = s.atom()?;
    match atom.to_ascii_uppercase().as_str() {
        "OK" => Ok(Completion::Ok),
        "NO" => Ok(Completion::No),
        "BAD" => Ok(Completion::Bad),
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("unknown completion status {other}"),
        }),
    }
}

fn parse_untagged(s: &mut Scanner<'_>) -> Result<UntaggedResponse> {
    match s.token()? {
        Token::Atom(keyword) => parse_keyword_data(s, keyword),
        Token::Number(n) => parse_numbered_data(s, n),
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("unexpected token after *: {other:?}"),
        }),
    }
}

fn parse_keyword_data(s: &mut Scanner<'_>, keyword: &str) -> Result<UntaggedResponse> {
    match keyword.to_ascii_uppercase().as_str() {
        "OK" => {
            s.expect_space()?;
            let (code, text) = parse_resp_text(s)?;
            Ok(UntaggedResponse::Ok { code, text })
        }
        "NO" => {
            s.expect_space()?;
            let (_, text) = parse_resp_text(s)?;
            Ok(UntaggedResponse::No { text })
        }
        "BAD" => {
            s.expect_space()?;
            let (_, text) = parse_resp_text(s)?;
            Ok(UntaggedResponse::Bad { text })
        }
        "BYE" => {
            s.expect_space()?;
            let (_, text) = parse_resp_text(s)?;
            Ok(UntaggedResponse::Bye { text })
        }
        "PREAUTH" => {
            s.expect_space()?;
            let (code, text) = parse_resp_text(s)?;
            Ok(UntaggedResponse::Ok { code, text })
        }
        "CAPABILITY" => Ok(UntaggedResponse::Capability(parse_capabilities(s))),
        "FLAGS" => {
            s.expect_space()?;
            Ok(UntaggedResponse::Flags(parse_flag_list(s)?))
        }
        "LIST" => {
            s.expect_space()?;
            Ok(UntaggedResponse::List(parse_list_entry(s)?))
        }
        "LSUB" => {
            s.expect_space()?;
            Ok(UntaggedResponse::Lsub(parse_list_entry(s)?))
        }
        "STATUS" => {
            s.expect_space()?;
            let (mailbox, counts) = parse_status(s)?;
            Ok(UntaggedResponse::Status { mailbox, counts })
        }
        "SEARCH" => {
            let mut hits = Vec::new();
            while s.peek() == Some(b' ') {
                s.skip(1);
                if let Token::Number(n) = s.token()? {
                    hits.push(n);
                }
            }
            Ok(UntaggedResponse::Search(hits))
        }
        "NAMESPACE" => {
            s.expect_space()?;
            parse_namespace(s)
        }
        other => {
            tracing::debug!(keyword = other, "skipping unrecognized untagged response");
            Ok(UntaggedResponse::Ignored(other.to_string()))
        }
    }
}

fn parse_numbered_data(s: &mut Scanner<'_>, n: u32) -> Result<UntaggedResponse> {
    s.expect_space()?;
    let keyword = s.atom()?;
    match keyword.to_ascii_uppercase().as_str() {
        "EXISTS" => Ok(UntaggedResponse::Exists(n)),
        "RECENT" => Ok(UntaggedResponse::Recent(n)),
        "EXPUNGE" => Ok(UntaggedResponse::Expunge(SeqNum(n))),
        "FETCH" => {
            s.expect_space()?;
            let data = fetch::parse_fetch_data(s)?;
            Ok(UntaggedResponse::Fetch {
                seq: SeqNum(n),
                data,
            })
        }
        other => {
            tracing::debug!(keyword = other, "skipping unrecognized message data");
            Ok(UntaggedResponse::Ignored(other.to_string()))
        }
    }
}

/// Parses `[CODE ...]`-prefixed response text.
fn parse_resp_text(s: &mut Scanner<'_>) -> Result<(Option<RespCode>, String)> {
    let code = if s.peek() == Some(b'[') {
        Some(parse_resp_code(s)?)
    } else {
        None
    };
    if s.peek() == Some(b' ') {
        s.skip(1);
    }
    Ok((code, s.text_to_eol()))
}

fn parse_resp_code(s: &mut Scanner<'_>) -> Result<RespCode> {
    s.skip(1); // '['
    let name = s.atom()?.to_string();

    let code = match name.to_ascii_uppercase().as_str() {
        "ALERT" => RespCode::Alert,
        "READ-ONLY" => RespCode::ReadOnly,
        "READ-WRITE" => RespCode::ReadWrite,
        "TRYCREATE" => RespCode::TryCreate,
        "UNSEEN" => {
            s.expect_space()?;
            RespCode::Unseen(s.number()?)
        }
        "UIDVALIDITY" => {
            s.expect_space()?;
            RespCode::UidValidity(s.number()?)
        }
        "UIDNEXT" => {
            s.expect_space()?;
            RespCode::UidNext(s.number()?)
        }
        "PERMANENTFLAGS" => {
            s.expect_space()?;
            RespCode::PermanentFlags(parse_flag_list(s)?)
        }
        "CAPABILITY" => RespCode::Capability(parse_capabilities(s)),
        _ => RespCode::Other(name),
    };

    // Drain anything left inside the brackets (unknown code arguments).
    while s.peek().is_some_and(|b| b != b']') {
        s.skip(1);
    }
    if s.peek() == Some(b']') {
        s.skip(1);
    }
    Ok(code)
}

fn parse_capabilities(s: &mut Scanner<'_>) -> CapabilitySet {
    let mut atoms = Vec::new();
    while s.peek() == Some(b' ') {
        s.skip(1);
        if let Ok(Token::Atom(a)) = s.token() {
            atoms.push(a);
        } else {
            break;
        }
    }
    CapabilitySet::from_atoms(atoms)
}

/// Parses a parenthesized flag list.
pub(super) fn parse_flag_list(s: &mut Scanner<'_>) -> Result<Flags> {
    match s.token()? {
        Token::Open => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected flag list, got {other:?}"),
            });
        }
    }
    let mut flags = Flags::new();
    loop {
        match s.token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(a) => flags.insert(Flag::parse(a)),
            other => {
                return Err(Error::Parse {
                    position: s.position(),
                    message: format!("unexpected token in flag list: {other:?}"),
                });
            }
        }
    }
    Ok(flags)
}

/// Parses the body of a LIST/LSUB response after the keyword.
///
/// The name may arrive as an atom, a quoted string (escaping stripped), or
/// a literal continuation the wire layer already coalesced.
fn parse_list_entry(s: &mut Scanner<'_>) -> Result<ListEntry> {
    match s.token()? {
        Token::Open => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected attribute list, got {other:?}"),
            });
        }
    }
    let mut attrs = Vec::new();
    loop {
        match s.token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(a) => attrs.push(MailboxAttr::parse(a)),
            other => {
                return Err(Error::Parse {
                    position: s.position(),
                    message: format!("unexpected token in LIST attributes: {other:?}"),
                });
            }
        }
    }
    s.expect_space()?;

    let delimiter = match s.token()? {
        Token::Nil => None,
        Token::Quoted(q) => q.chars().next(),
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected delimiter, got {other:?}"),
            });
        }
    };
    s.expect_space()?;
    let name = s.astring()?;

    Ok(ListEntry {
        attrs,
        delimiter,
        name,
    })
}

fn parse_status(s: &mut Scanner<'_>) -> Result<(String, StatusCounts)> {
    let mailbox = s.astring()?;
    s.expect_space()?;
    match s.token()? {
        Token::Open => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected status list, got {other:?}"),
            });
        }
    }

    let mut counts = StatusCounts::default();
    loop {
        match s.token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(name) => {
                s.expect_space()?;
                let value = s.number()?;
                match name.to_ascii_uppercase().as_str() {
                    "MESSAGES" => counts.messages = value,
                    "RECENT" => counts.recent = value,
                    "UNSEEN" => counts.unseen = value,
                    "UIDNEXT" => counts.uid_next = value,
                    "UIDVALIDITY" => counts.uid_validity = value,
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Ok((mailbox, counts))
}

/// Parses `NAMESPACE` data, keeping only the first personal entry.
fn parse_namespace(s: &mut Scanner<'_>) -> Result<UntaggedResponse> {
    match s.token()? {
        Token::Nil => Ok(UntaggedResponse::Namespace {
            prefix: String::new(),
            delimiter: None,
        }),
        Token::Open => {
            // (("prefix" "delim") ...)
            match s.token()? {
                Token::Open => {}
                other => {
                    return Err(Error::Parse {
                        position: s.position(),
                        message: format!("expected namespace pair, got {other:?}"),
                    });
                }
            }
            let prefix = s.astring()?;
            s.expect_space()?;
            let delimiter = match s.token()? {
                Token::Nil => None,
                Token::Quoted(q) => q.chars().next(),
                _ => None,
            };
            // The rest of the namespace data is not consumed by this client.
            Ok(UntaggedResponse::Namespace { prefix, delimiter })
        }
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("expected namespace data, got {other:?}"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn untagged(block: &[u8]) -> UntaggedResponse {
        match ServerResponse::parse(block).unwrap() {
            ServerResponse::Untagged(u) => u,
            other => panic!("expected untagged, got {other:?}"),
        }
    }

    #[test]
    fn tagged_ok() {
        let r = ServerResponse::parse(b"A7 OK SELECT completed\r\n").unwrap();
        match r {
            ServerResponse::Tagged {
                tag, status, text, ..
            } => {
                assert_eq!(tag, "A7");
                assert_eq!(status, Completion::Ok);
                assert_eq!(text, "SELECT completed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tagged_no_keeps_server_text() {
        let r = ServerResponse::parse(b"A2 NO [TRYCREATE] no such mailbox\r\n").unwrap();
        match r {
            ServerResponse::Tagged { status, code, text, .. } => {
                assert_eq!(status, Completion::No);
                assert_eq!(code, Some(RespCode::TryCreate));
                assert_eq!(text, "no such mailbox");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn untagged_counters() {
        assert_eq!(untagged(b"* 10 EXISTS\r\n"), UntaggedResponse::Exists(10));
        assert_eq!(untagged(b"* 2 RECENT\r\n"), UntaggedResponse::Recent(2));
        assert_eq!(
            untagged(b"* 4 EXPUNGE\r\n"),
            UntaggedResponse::Expunge(SeqNum(4))
        );
    }

    #[test]
    fn untagged_ok_with_codes() {
        match untagged(b"* OK [UIDVALIDITY 100] UIDs valid\r\n") {
            UntaggedResponse::Ok { code, .. } => {
                assert_eq!(code, Some(RespCode::UidValidity(100)));
            }
            other => panic!("unexpected {other:?}"),
        }
        match untagged(b"* OK [UNSEEN 3] first unseen\r\n") {
            UntaggedResponse::Ok { code, .. } => {
                assert_eq!(code, Some(RespCode::Unseen(3)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn capability_line() {
        match untagged(b"* CAPABILITY IMAP4rev1 IDLE NAMESPACE STARTTLS\r\n") {
            UntaggedResponse::Capability(caps) => {
                assert!(caps.supports_idle());
                assert!(caps.supports_namespace());
                assert!(caps.supports_starttls());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_with_quoted_name() {
        match untagged(b"* LIST (\\HasChildren) \"/\" \"Projects/2024\"\r\n") {
            UntaggedResponse::List(entry) => {
                assert_eq!(entry.delimiter, Some('/'));
                assert_eq!(entry.name, "Projects/2024");
                assert!(entry.attrs.contains(&MailboxAttr::HasChildren));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn list_with_literal_name_containing_brace_lookalikes() {
        // The name arrives as a literal and contains "{3}" as plain text;
        // it must not be mistaken for a nested literal marker.
        let block = b"* LIST (\\Noselect) \"/\" {8}\r\nodd {3} x\r\n";
        // {8} covers "odd {3} " — 8 bytes.
        match untagged(block) {
            UntaggedResponse::List(entry) => {
                assert_eq!(entry.name, "odd {3} ");
                assert!(!entry.selectable());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_counts() {
        match untagged(b"* STATUS Archive (MESSAGES 231 UIDNEXT 44292 UNSEEN 5)\r\n") {
            UntaggedResponse::Status { mailbox, counts } => {
                assert_eq!(mailbox, "Archive");
                assert_eq!(counts.messages, 231);
                assert_eq!(counts.uid_next, 44292);
                assert_eq!(counts.unseen, 5);
                assert_eq!(counts.recent, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn namespace_personal_prefix() {
        match untagged(b"* NAMESPACE ((\"INBOX.\" \".\")) NIL NIL\r\n") {
            UntaggedResponse::Namespace { prefix, delimiter } => {
                assert_eq!(prefix, "INBOX.");
                assert_eq!(delimiter, Some('.'));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn continuation_request() {
        let r = ServerResponse::parse(b"+ Ready for literal data\r\n").unwrap();
        assert_eq!(
            r,
            ServerResponse::Continuation("Ready for literal data".to_string())
        );
    }

    #[test]
    fn unknown_untagged_is_skipped_not_fatal() {
        assert_eq!(
            untagged(b"* ENABLED CONDSTORE\r\n"),
            UntaggedResponse::Ignored("ENABLED".to_string())
        );
    }

    #[test]
    fn fetch_with_uid_and_flags() {
        match untagged(b"* 3 FETCH (UID 44 FLAGS (\\Seen))\r\n") {
            UntaggedResponse::Fetch { seq, data } => {
                assert_eq!(seq, SeqNum(3));
                assert_eq!(data.uid, Some(Uid(44)));
                assert!(data.flags.unwrap().contains(&Flag::Seen));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
