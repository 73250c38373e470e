//! BODYSTRUCTURE parsing.
//!
//! A body structure is a nested parenthesis tree: a group opening with a
//! string token is a leaf part (type, subtype, parameters, id, description,
//! encoding, size), a group opening with another group is a multipart
//! container whose trailing string is the multipart subtype.
//!
//! Part addresses are dotted paths. The server numbers the children of the
//! outermost container from `1`, so after assigning full paths from a
//! synthetic root we strip the root's own leading segment; fetch requests
//! must match the server's numbering byte for byte.

use crate::{Error, Result};

use super::lexer::{Scanner, Token};

/// One node of a parsed body structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePart {
    /// Dotted part address usable in a `BODY[...]` fetch. Empty for the
    /// outermost multipart container, which is not itself fetchable.
    pub address: String,
    pub content: PartContent,
}

/// Leaf or container content of a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartContent {
    Leaf {
        /// Media type, lowercased (`text`, `image`, ...).
        media_type: String,
        /// Media subtype, lowercased (`plain`, `png`, ...).
        subtype: String,
        /// Body parameters as reported (`charset`, `name`, ...), with
        /// lowercased keys.
        params: Vec<(String, String)>,
        content_id: Option<String>,
        description: Option<String>,
        /// Content transfer encoding, lowercased.
        encoding: Option<String>,
        /// Size in octets; 0 when the server reported something unusable.
        size: u32,
        /// `inline` or `attachment`, when the extension data carries one.
        disposition: Option<String>,
    },
    Multipart {
        /// Multipart subtype, lowercased (`mixed`, `alternative`, ...).
        subtype: String,
        parts: Vec<MessagePart>,
    },
}

impl MessagePart {
    /// Depth-first iteration over this part and all descendants.
    pub fn walk(&self, visit: &mut impl FnMut(&MessagePart)) {
        visit(self);
        if let PartContent::Multipart { parts, .. } = &self.content {
            for part in parts {
                part.walk(visit);
            }
        }
    }
}

/// Parses a complete body structure, opening parenthesis included.
pub fn parse_structure(s: &mut Scanner<'_>) -> Result<MessagePart> {
    match s.token()? {
        Token::Open => parse_structure_after_open(s),
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("expected body structure, got {other:?}"),
        }),
    }
}

/// Parses a body structure whose opening parenthesis is already consumed.
pub fn parse_structure_after_open(s: &mut Scanner<'_>) -> Result<MessagePart> {
    let content = parse_content(s)?;
    let mut root = MessagePart {
        address: "1".to_string(),
        content,
    };
    assign_addresses(&mut root);
    strip_outer_segment(&mut root);
    Ok(root)
}

/// Parses one group body, consuming the matching close parenthesis.
fn parse_content(s: &mut Scanner<'_>) -> Result<PartContent> {
    if s.peek() == Some(b'(') {
        parse_multipart(s)
    } else {
        parse_leaf(s)
    }
}

fn parse_multipart(s: &mut Scanner<'_>) -> Result<PartContent> {
    let mut parts = Vec::new();
    while s.peek() == Some(b'(') {
        s.skip(1);
        parts.push(MessagePart {
            address: String::new(),
            content: parse_content(s)?,
        });
    }
    s.expect_space()?;
    let subtype = s.astring()?.to_ascii_lowercase();

    // Extension data (parameters, disposition, language) follows; not
    // meaningful for a container.
    skip_to_close(s)?;
    Ok(PartContent::Multipart { subtype, parts })
}

fn parse_leaf(s: &mut Scanner<'_>) -> Result<PartContent> {
    let media_type = s
        .nstring()?
        .unwrap_or_default()
        .to_ascii_lowercase();
    s.expect_space()?;
    let subtype = s
        .nstring()?
        .unwrap_or_default()
        .to_ascii_lowercase();
    s.expect_space()?;
    let params = parse_params(s)?;
    s.expect_space()?;
    let content_id = s.nstring()?;
    s.expect_space()?;
    let description = s.nstring()?;
    s.expect_space()?;
    let encoding = s.nstring()?.map(|e| e.to_ascii_lowercase());
    s.expect_space()?;
    let size = s.number().unwrap_or(0);

    // The tail varies by media type (line counts for text parts, a full
    // embedded envelope for message/rfc822) before the common extension
    // fields. Scan it for a disposition and ignore the rest.
    let disposition = scan_tail(s)?;

    Ok(PartContent::Leaf {
        media_type,
        subtype,
        params,
        content_id,
        description,
        encoding,
        size,
        disposition,
    })
}

/// Parses a parameter list: `NIL` or `("key" "value" ...)`.
fn parse_params(s: &mut Scanner<'_>) -> Result<Vec<(String, String)>> {
    match s.token()? {
        Token::Nil => Ok(Vec::new()),
        Token::Open => {
            let mut params = Vec::new();
            loop {
                match s.token()? {
                    Token::Close => break,
                    Token::Space => {}
                    Token::Quoted(key) => {
                        s.expect_space()?;
                        let value = s.astring()?;
                        params.push((key.to_ascii_lowercase(), value));
                    }
                    Token::Literal(key) => {
                        s.expect_space()?;
                        let value = s.astring()?;
                        let key = String::from_utf8_lossy(&key).to_ascii_lowercase();
                        params.push((key, value));
                    }
                    other => {
                        return Err(Error::Parse {
                            position: s.position(),
                            message: format!("bad body parameter: {other:?}"),
                        });
                    }
                }
            }
            Ok(params)
        }
        other => Err(Error::Parse {
            position: s.position(),
            message: format!("expected parameter list, got {other:?}"),
        }),
    }
}

/// Consumes the remainder of a leaf group, picking out a disposition type
/// (`inline`/`attachment`) if one appears in the extension data.
fn scan_tail(s: &mut Scanner<'_>) -> Result<Option<String>> {
    let mut disposition = None;
    let mut depth = 0u32;
    let mut just_opened = false;
    loop {
        let token = s.token()?;
        match token {
            Token::Close => {
                if depth == 0 {
                    return Ok(disposition);
                }
                depth -= 1;
            }
            Token::Open => {
                depth += 1;
                just_opened = true;
                continue;
            }
            Token::Quoted(text) if just_opened => {
                let lowered = text.to_ascii_lowercase();
                if disposition.is_none() && (lowered == "inline" || lowered == "attachment") {
                    disposition = Some(lowered);
                }
            }
            Token::End => {
                return Err(Error::Parse {
                    position: s.position(),
                    message: "unterminated body part".to_string(),
                });
            }
            _ => {}
        }
        just_opened = false;
    }
}

/// Consumes tokens through the matching close parenthesis at this depth.
fn skip_to_close(s: &mut Scanner<'_>) -> Result<()> {
    let mut depth = 0u32;
    loop {
        match s.token()? {
            Token::Close => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Token::Open => depth += 1,
            Token::End => {
                return Err(Error::Parse {
                    position: s.position(),
                    message: "unterminated multipart".to_string(),
                });
            }
            _ => {}
        }
    }
}

/// Assigns dotted addresses: children of a part at `A` get `A.1`, `A.2`, ...
fn assign_addresses(part: &mut MessagePart) {
    if let PartContent::Multipart { parts, .. } = &mut part.content {
        for (i, child) in parts.iter_mut().enumerate() {
            child.address = format!("{}.{}", part.address, i + 1);
            assign_addresses(child);
        }
    }
}

/// Drops the synthetic root's leading segment so the outermost container's
/// children are addressed `1`, `2`, ... as the server numbers them. A leaf
/// root keeps its `1`.
fn strip_outer_segment(root: &mut MessagePart) {
    if !matches!(root.content, PartContent::Multipart { .. }) {
        return;
    }
    root.address.clear();
    root.walk_mut(&mut |part| {
        if let Some(stripped) = part.address.strip_prefix("1.") {
            part.address = stripped.to_string();
        }
    });
}

impl MessagePart {
    fn walk_mut(&mut self, visit: &mut impl FnMut(&mut MessagePart)) {
        visit(self);
        if let PartContent::Multipart { parts, .. } = &mut self.content {
            for part in parts {
                part.walk_mut(visit);
            }
        }
    }
}
