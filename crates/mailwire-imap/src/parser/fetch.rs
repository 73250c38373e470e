//! FETCH data-item parsing.
//!
//! A server may split one message's data across several untagged FETCH
//! lines; each line parses into a [`FetchData`] and the session merges
//! records for the same sequence index before handing them up.

use crate::types::{Address, Envelope, Flags, Uid};
use crate::{Error, Result};

use super::lexer::{Scanner, Token};
use super::response::parse_flag_list;
use super::structure::{self, MessagePart};

/// A fetched body section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    /// Section address as the server reported it (for example `1.2`,
    /// `HEADER`, or empty for the whole body).
    pub address: String,
    /// Partial-fetch origin octet, if any.
    pub origin: Option<u32>,
    /// Raw section bytes.
    pub data: Vec<u8>,
}

/// Parsed data items from one FETCH line.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchData {
    /// `UID`
    pub uid: Option<Uid>,
    /// `FLAGS`
    pub flags: Option<Flags>,
    /// `INTERNALDATE` as sent.
    pub internal_date: Option<String>,
    /// `RFC822.SIZE`
    pub size: Option<u32>,
    /// `ENVELOPE`
    pub envelope: Option<Box<Envelope>>,
    /// `BODYSTRUCTURE`
    pub structure: Option<MessagePart>,
    /// `BODY[...]` sections.
    pub sections: Vec<BodySection>,
}

impl FetchData {
    /// Folds another record for the same message into this one.
    pub fn merge(&mut self, other: Self) {
        self.uid = self.uid.or(other.uid);
        self.flags = self.flags.take().or(other.flags);
        self.internal_date = self.internal_date.take().or(other.internal_date);
        self.size = self.size.or(other.size);
        self.envelope = self.envelope.take().or(other.envelope);
        self.structure = self.structure.take().or(other.structure);
        self.sections.extend(other.sections);
    }
}

/// Parses the parenthesized item list of a FETCH response.
pub fn parse_fetch_data(s: &mut Scanner<'_>) -> Result<FetchData> {
    match s.token()? {
        Token::Open => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected fetch item list, got {other:?}"),
            });
        }
    }

    let mut data = FetchData::default();
    loop {
        match s.token()? {
            Token::Close => break,
            Token::Space => {}
            Token::Atom(name) => parse_item(s, name, &mut data)?,
            other => {
                return Err(Error::Parse {
                    position: s.position(),
                    message: format!("unexpected token in fetch items: {other:?}"),
                });
            }
        }
    }
    Ok(data)
}

fn parse_item(s: &mut Scanner<'_>, name: &str, data: &mut FetchData) -> Result<()> {
    match name.to_ascii_uppercase().as_str() {
        "UID" => {
            s.expect_space()?;
            data.uid = Some(Uid(s.number()?));
        }
        "FLAGS" => {
            s.expect_space()?;
            data.flags = Some(parse_flag_list(s)?);
        }
        "INTERNALDATE" => {
            s.expect_space()?;
            if let Token::Quoted(date) = s.token()? {
                data.internal_date = Some(date);
            }
        }
        "RFC822.SIZE" => {
            s.expect_space()?;
            data.size = Some(s.number()?);
        }
        "ENVELOPE" => {
            s.expect_space()?;
            data.envelope = Some(Box::new(parse_envelope(s)?));
        }
        "BODYSTRUCTURE" => {
            s.expect_space()?;
            data.structure = Some(structure::parse_structure(s)?);
        }
        "BODY" | "BODY.PEEK" | "RFC822" | "RFC822.HEADER" | "RFC822.TEXT" => {
            let (address, origin) = parse_section_suffix(s);
            s.expect_space()?;
            match s.token()? {
                Token::Literal(bytes) => data.sections.push(BodySection {
                    address,
                    origin,
                    data: bytes,
                }),
                Token::Quoted(text) => data.sections.push(BodySection {
                    address,
                    origin,
                    data: text.into_bytes(),
                }),
                Token::Nil => {}
                // Bare BODY (no section) is a body structure synonym.
                Token::Open => {
                    // Reparse as a structure: back up is not possible, so
                    // delegate to the open-paren entry point.
                    data.structure = Some(structure::parse_structure_after_open(s)?);
                }
                other => {
                    return Err(Error::Parse {
                        position: s.position(),
                        message: format!("unexpected body value: {other:?}"),
                    });
                }
            }
        }
        other => {
            tracing::debug!(item = other, "skipping unrecognized fetch item");
            skip_item_value(s);
        }
    }
    Ok(())
}

/// Consumes an optional `[section]<origin>` suffix after a BODY atom.
fn parse_section_suffix(s: &mut Scanner<'_>) -> (String, Option<u32>) {
    let mut address = String::new();
    let mut origin = None;

    if s.peek() == Some(b'[') {
        s.skip(1);
        while let Some(b) = s.peek() {
            if b == b']' {
                s.skip(1);
                break;
            }
            address.push(char::from(b));
            s.skip(1);
        }
    }
    if s.peek() == Some(b'<') {
        s.skip(1);
        let mut digits = String::new();
        while let Some(b) = s.peek() {
            if b == b'>' {
                s.skip(1);
                break;
            }
            if b.is_ascii_digit() {
                digits.push(char::from(b));
            }
            s.skip(1);
        }
        origin = digits.parse().ok();
    }
    (address, origin)
}

/// Skips one unknown item value, balancing parentheses.
fn skip_item_value(s: &mut Scanner<'_>) {
    if s.peek() == Some(b' ') {
        s.skip(1);
    }
    let mut depth = 0u32;
    while let Some(b) = s.peek() {
        match b {
            b'(' => {
                depth += 1;
                s.skip(1);
            }
            b')' => {
                if depth == 0 {
                    return;
                }
                depth -= 1;
                s.skip(1);
            }
            b' ' if depth == 0 => return,
            b'{' => {
                // Literal inside an unknown item: consume it whole.
                if s.token().is_err() {
                    return;
                }
            }
            _ => s.skip(1),
        }
    }
}

/// Parses an ENVELOPE structure:
/// `(date subject from sender reply-to to cc bcc in-reply-to message-id)`.
pub fn parse_envelope(s: &mut Scanner<'_>) -> Result<Envelope> {
    match s.token()? {
        Token::Open => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("expected envelope, got {other:?}"),
            });
        }
    }

    let date = s.nstring()?;
    s.expect_space()?;
    let subject = s.nstring()?;
    s.expect_space()?;
    let from = parse_address_list(s)?;
    s.expect_space()?;
    let _sender = parse_address_list(s)?;
    s.expect_space()?;
    let reply_to = parse_address_list(s)?;
    s.expect_space()?;
    let to = parse_address_list(s)?;
    s.expect_space()?;
    let cc = parse_address_list(s)?;
    s.expect_space()?;
    let _bcc = parse_address_list(s)?;
    s.expect_space()?;
    let in_reply_to = s.nstring()?;
    s.expect_space()?;
    let message_id = s.nstring()?;

    match s.token()? {
        Token::Close => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("unterminated envelope: {other:?}"),
            });
        }
    }

    Ok(Envelope {
        date,
        subject,
        from,
        reply_to,
        to,
        cc,
        in_reply_to,
        message_id,
    })
}

fn parse_address_list(s: &mut Scanner<'_>) -> Result<Vec<Address>> {
    match s.token()? {
        Token::Nil => Ok(Vec::new()),
        Token::Open => {
            let mut out = Vec::new();
            loop {
                match s.peek() {
                    Some(b')') => {
                        s.skip(1);
                        break;
                    }
                    Some(b'(') => out.push(parse_address(s)?),
                    Some(b' ') => s.skip(1),
                    _ => break,
                }
            }
            Ok(out)
        }
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("expected address list, got {other:?}"),
        }),
    }
}

fn parse_address(s: &mut Scanner<'_>) -> Result<Address> {
    s.skip(1); // '('
    let name = s.nstring()?;
    s.expect_space()?;
    let _adl = s.nstring()?;
    s.expect_space()?;
    let mailbox = s.nstring()?;
    s.expect_space()?;
    let host = s.nstring()?;
    match s.token()? {
        Token::Close => {}
        other => {
            return Err(Error::Parse {
                position: s.position(),
                message: format!("unterminated address: {other:?}"),
            });
        }
    }
    Ok(Address {
        name,
        mailbox,
        host,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::Flag;

    fn parse(block: &[u8]) -> FetchData {
        let mut s = Scanner::new(block);
        parse_fetch_data(&mut s).unwrap()
    }

    #[test]
    fn flags_and_uid() {
        let data = parse(b"(FLAGS (\\Seen \\Answered) UID 512)");
        assert_eq!(data.uid, Some(Uid(512)));
        let flags = data.flags.unwrap();
        assert!(flags.contains(&Flag::Seen));
        assert!(flags.contains(&Flag::Answered));
    }

    #[test]
    fn envelope_subject_and_from() {
        let data = parse(
            b"(UID 9 ENVELOPE (\"Mon, 1 Jan 2024 10:00:00 +0000\" \"Hi there\" \
              ((\"Ann\" NIL \"ann\" \"example.com\")) NIL NIL \
              ((NIL NIL \"bob\" \"example.org\")) NIL NIL NIL \"<id@x>\"))",
        );
        let env = data.envelope.unwrap();
        assert_eq!(env.subject.as_deref(), Some("Hi there"));
        assert_eq!(env.from[0].display(), "Ann");
        assert_eq!(env.to[0].display(), "bob@example.org");
        assert_eq!(env.message_id.as_deref(), Some("<id@x>"));
    }

    #[test]
    fn body_section_with_literal() {
        let data = parse(b"(UID 2 BODY[1] {5}\r\nhello)");
        assert_eq!(data.sections.len(), 1);
        assert_eq!(data.sections[0].address, "1");
        assert_eq!(data.sections[0].data, b"hello");
    }

    #[test]
    fn body_section_with_origin() {
        let data = parse(b"(BODY[TEXT]<200> {3}\r\nabc)");
        assert_eq!(data.sections[0].address, "TEXT");
        assert_eq!(data.sections[0].origin, Some(200));
    }

    #[test]
    fn unknown_items_are_skipped() {
        let data = parse(b"(X-GM-MSGID 1278455344230334865 UID 7)");
        assert_eq!(data.uid, Some(Uid(7)));
    }

    #[test]
    fn merge_prefers_existing_then_fills() {
        let mut a = parse(b"(UID 7)");
        let b = parse(b"(FLAGS (\\Seen) UID 7)");
        a.merge(b);
        assert_eq!(a.uid, Some(Uid(7)));
        assert!(a.flags.unwrap().contains(&Flag::Seen));
    }

    #[test]
    fn internal_date_and_size() {
        let data = parse(b"(INTERNALDATE \"17-Jul-1996 02:44:25 -0700\" RFC822.SIZE 4286)");
        assert_eq!(
            data.internal_date.as_deref(),
            Some("17-Jul-1996 02:44:25 -0700")
        );
        assert_eq!(data.size, Some(4286));
    }
}
