//! Tokenizer for IMAP server responses.
//!
//! Splits a coalesced response block (one logical line plus any embedded
//! literals) into the token shapes of the RFC 3501 grammar: atoms, numbers,
//! quoted strings, literals, and the structural punctuation.

use crate::{Error, Result};

/// A single response token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// `*`
    Star,
    /// `+`
    Plus,
    /// A single space.
    Space,
    /// `(`
    Open,
    /// `)`
    Close,
    /// `[`
    BracketOpen,
    /// `]`
    BracketClose,
    /// Bare atom, including flag atoms like `\Seen`.
    Atom(&'a str),
    /// Unsigned decimal number.
    Number(u32),
    /// Double-quoted string with IMAP escaping removed.
    Quoted(String),
    /// Raw literal bytes (already read past the `{n}` marker).
    Literal(Vec<u8>),
    /// `NIL`
    Nil,
    /// Line terminator.
    Crlf,
    /// End of block.
    End,
}

/// Byte cursor over one response block.
pub struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Creates a scanner over a response block.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Current byte offset, for error reporting.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Remaining unscanned bytes.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.input[self.pos.min(self.input.len())..]
    }

    /// Peeks at the next byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Consumes and returns one byte.
    pub fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    /// Skips `n` bytes, clamped to the end of input.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    fn fail(&self, message: impl Into<String>) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    /// Reads the next token.
    pub fn token(&mut self) -> Result<Token<'a>> {
        let Some(b) = self.peek() else {
            return Ok(Token::End);
        };

        match b {
            b' ' => {
                self.pos += 1;
                Ok(Token::Space)
            }
            b'*' => {
                self.pos += 1;
                Ok(Token::Star)
            }
            b'+' => {
                self.pos += 1;
                Ok(Token::Plus)
            }
            b'(' => {
                self.pos += 1;
                Ok(Token::Open)
            }
            b')' => {
                self.pos += 1;
                Ok(Token::Close)
            }
            b'[' => {
                self.pos += 1;
                Ok(Token::BracketOpen)
            }
            b']' => {
                self.pos += 1;
                Ok(Token::BracketClose)
            }
            b'\r' => {
                if self.input.get(self.pos + 1) == Some(&b'\n') {
                    self.pos += 2;
                    Ok(Token::Crlf)
                } else {
                    Err(self.fail("bare CR in response"))
                }
            }
            b'"' => self.quoted(),
            b'{' => self.literal(),
            _ if is_atom_byte(b) => self.atom_or_number(),
            _ => Err(self.fail(format!("unexpected byte {b:#04x}"))),
        }
    }

    fn quoted(&mut self) -> Result<Token<'a>> {
        self.pos += 1; // opening quote
        let mut value = Vec::new();
        loop {
            match self.bump() {
                Some(b'"') => break,
                Some(b'\\') => match self.bump() {
                    Some(c @ (b'"' | b'\\')) => value.push(c),
                    Some(c) => return Err(self.fail(format!("invalid escape \\{}", char::from(c)))),
                    None => return Err(self.fail("truncated quoted string")),
                },
                Some(c) => value.push(c),
                None => return Err(self.fail("truncated quoted string")),
            }
        }
        String::from_utf8(value)
            .map(Token::Quoted)
            .map_err(|_| self.fail("quoted string is not UTF-8"))
    }

    /// Reads a `{n}` marker followed by CRLF and exactly `n` raw bytes.
    ///
    /// The byte count — not line endings — decides where the value ends, so
    /// values containing CRLF-looking bytes come through intact.
    fn literal(&mut self) -> Result<Token<'a>> {
        self.pos += 1; // '{'
        let digits_start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        // Tolerate the LITERAL+ marker.
        let plus = self.peek() == Some(b'+');
        if plus {
            self.pos += 1;
        }
        if self.bump() != Some(b'}') {
            return Err(self.fail("malformed literal marker"));
        }
        let digits = &self.input[digits_start..if plus { self.pos - 2 } else { self.pos - 1 }];
        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.fail("bad literal length"))?;

        if self.peek() == Some(b'\r') && self.input.get(self.pos + 1) == Some(&b'\n') {
            self.pos += 2;
        }
        if self.pos + len > self.input.len() {
            return Err(self.fail("literal data truncated"));
        }
        let data = self.input[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(Token::Literal(data))
    }

    fn atom_or_number(&mut self) -> Result<Token<'a>> {
        let start = self.pos;
        let mut digits_only = true;
        while let Some(b) = self.peek() {
            if !is_atom_byte(b) {
                break;
            }
            digits_only &= b.is_ascii_digit();
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.fail("atom is not UTF-8"))?;

        if digits_only {
            // Counts that overflow u32 degrade to the sentinel rather than
            // killing the whole listing.
            return Ok(Token::Number(text.parse().unwrap_or(0)));
        }
        if text.eq_ignore_ascii_case("NIL") {
            return Ok(Token::Nil);
        }
        Ok(Token::Atom(text))
    }

    /// Consumes a token and requires it to be a space.
    pub fn expect_space(&mut self) -> Result<()> {
        match self.token()? {
            Token::Space => Ok(()),
            other => Err(self.fail(format!("expected space, got {other:?}"))),
        }
    }

    /// Reads an astring (atom, quoted string, or literal) as text.
    pub fn astring(&mut self) -> Result<String> {
        match self.token()? {
            Token::Atom(s) => Ok(s.to_string()),
            Token::Quoted(s) => Ok(s),
            Token::Literal(data) => {
                String::from_utf8(data).map_err(|_| self.fail("literal is not UTF-8"))
            }
            other => Err(self.fail(format!("expected astring, got {other:?}"))),
        }
    }

    /// Reads an nstring: NIL, quoted string, or literal.
    pub fn nstring(&mut self) -> Result<Option<String>> {
        match self.token()? {
            Token::Nil => Ok(None),
            Token::Quoted(s) => Ok(Some(s)),
            Token::Literal(data) => Ok(Some(String::from_utf8_lossy(&data).into_owned())),
            other => Err(self.fail(format!("expected nstring, got {other:?}"))),
        }
    }

    /// Reads a number token.
    pub fn number(&mut self) -> Result<u32> {
        match self.token()? {
            Token::Number(n) => Ok(n),
            other => Err(self.fail(format!("expected number, got {other:?}"))),
        }
    }

    /// Reads an atom token.
    pub fn atom(&mut self) -> Result<&'a str> {
        match self.token()? {
            Token::Atom(s) => Ok(s),
            other => Err(self.fail(format!("expected atom, got {other:?}"))),
        }
    }

    /// Reads remaining text up to (and past) CRLF or end of block.
    pub fn text_to_eol(&mut self) -> String {
        let rest = self.rest();
        let end = rest
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(rest.len());
        let text = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.skip(end);
        if self.peek() == Some(b'\r') {
            self.skip(2);
        }
        text
    }
}

/// Atom bytes per RFC 3501, with `\` admitted so flag atoms scan whole.
const fn is_atom_byte(b: u8) -> bool {
    !matches!(
        b,
        b'(' | b')' | b'{' | b'}' | b' ' | b'%' | b'*' | b'"' | b'[' | b']' | b'<' | b'>'
    ) && b > 0x1F
        && b != 0x7F
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scans_tagged_ok_line() {
        let mut s = Scanner::new(b"A3 OK done\r\n");
        assert_eq!(s.token().unwrap(), Token::Atom("A3"));
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Atom("OK"));
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Atom("done"));
        assert_eq!(s.token().unwrap(), Token::Crlf);
        assert_eq!(s.token().unwrap(), Token::End);
    }

    #[test]
    fn scans_numbers_and_atoms() {
        let mut s = Scanner::new(b"23 EXISTS");
        assert_eq!(s.token().unwrap(), Token::Number(23));
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Atom("EXISTS"));
    }

    #[test]
    fn quoted_string_unescapes() {
        let mut s = Scanner::new(br#""a \"b\" \\c""#);
        assert_eq!(s.token().unwrap(), Token::Quoted(r#"a "b" \c"#.to_string()));
    }

    #[test]
    fn literal_is_byte_counted_not_line_delimited() {
        // The value contains CRLF; the byte count decides the boundary.
        let mut s = Scanner::new(b"{4}\r\na\r\nb rest");
        assert_eq!(s.token().unwrap(), Token::Literal(b"a\r\nb".to_vec()));
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Atom("rest"));
    }

    #[test]
    fn flag_atoms_scan_whole() {
        let mut s = Scanner::new(b"(\\Seen \\HasChildren)");
        assert_eq!(s.token().unwrap(), Token::Open);
        assert_eq!(s.token().unwrap(), Token::Atom("\\Seen"));
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Atom("\\HasChildren"));
        assert_eq!(s.token().unwrap(), Token::Close);
    }

    #[test]
    fn nil_is_recognized() {
        let mut s = Scanner::new(b"NIL nil");
        assert_eq!(s.token().unwrap(), Token::Nil);
        assert_eq!(s.token().unwrap(), Token::Space);
        assert_eq!(s.token().unwrap(), Token::Nil);
    }

    #[test]
    fn truncated_literal_is_an_error() {
        let mut s = Scanner::new(b"{10}\r\nabc");
        assert!(s.token().is_err());
    }
}
