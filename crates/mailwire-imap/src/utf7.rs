//! Modified UTF-7 mailbox-name codec (RFC 3501 section 5.1.3).
//!
//! IMAP mailbox names encode non-ASCII characters in a UTF-7 variant: `&`
//! opens a base64-encoded run of UTF-16BE code units, `-` closes it, `&-`
//! is a literal ampersand, and the base64 alphabet substitutes `,` for `/`.
//! Decoded names are used as folder-path map keys, so both directions must
//! be exact; a sloppy decoder would split one folder into two.

use crate::{Error, Result};

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+,";

fn base64_value(b: u8) -> Option<u32> {
    match b {
        b'A'..=b'Z' => Some(u32::from(b - b'A')),
        b'a'..=b'z' => Some(u32::from(b - b'a') + 26),
        b'0'..=b'9' => Some(u32::from(b - b'0') + 52),
        b'+' => Some(62),
        b',' => Some(63),
        _ => None,
    }
}

/// Decodes a modified UTF-7 mailbox name.
///
/// # Errors
///
/// Returns [`Error::Parse`] for an unterminated shift sequence, an invalid
/// base64 character, or UTF-16 data that does not form valid characters.
pub fn decode(encoded: &str) -> Result<String> {
    let bytes = encoded.as_bytes();
    let mut out = String::with_capacity(encoded.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'&' {
            out.push(char::from(bytes[i]));
            i += 1;
            continue;
        }

        // Shift sequence: find the closing '-'.
        let start = i + 1;
        let Some(rel_end) = bytes[start..].iter().position(|&b| b == b'-') else {
            return Err(Error::Parse {
                position: i,
                message: "unterminated UTF-7 shift sequence".to_string(),
            });
        };
        let end = start + rel_end;

        if end == start {
            out.push('&');
        } else {
            let units = decode_units(&bytes[start..end], start)?;
            let text = String::from_utf16(&units).map_err(|_| Error::Parse {
                position: start,
                message: "invalid UTF-16 in mailbox name".to_string(),
            })?;
            out.push_str(&text);
        }
        i = end + 1;
    }

    Ok(out)
}

/// Decodes a base64 run into UTF-16BE code units.
fn decode_units(run: &[u8], position: usize) -> Result<Vec<u16>> {
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    let mut raw = Vec::with_capacity(run.len());

    for &b in run {
        let Some(v) = base64_value(b) else {
            return Err(Error::Parse {
                position,
                message: format!("invalid UTF-7 base64 byte {b:#04x}"),
            });
        };
        acc = (acc << 6) | v;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            raw.push(u8::try_from((acc >> bits) & 0xFF).unwrap_or(0));
        }
    }

    if raw.len() % 2 != 0 {
        return Err(Error::Parse {
            position,
            message: "odd byte count in UTF-7 sequence".to_string(),
        });
    }

    Ok(raw
        .chunks_exact(2)
        .map(|pair| (u16::from(pair[0]) << 8) | u16::from(pair[1]))
        .collect())
}

/// Encodes a mailbox name into modified UTF-7.
#[must_use]
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending: Vec<u16> = Vec::new();

    for ch in name.chars() {
        if ('\u{20}'..='\u{7e}').contains(&ch) {
            if !pending.is_empty() {
                flush_units(&mut out, &pending);
                pending.clear();
            }
            if ch == '&' {
                out.push_str("&-");
            } else {
                out.push(ch);
            }
        } else {
            let mut buf = [0u16; 2];
            pending.extend_from_slice(ch.encode_utf16(&mut buf));
        }
    }
    if !pending.is_empty() {
        flush_units(&mut out, &pending);
    }

    out
}

/// Writes a `&...-` shift sequence for the given UTF-16 units.
fn flush_units(out: &mut String, units: &[u16]) {
    let bytes: Vec<u8> = units
        .iter()
        .flat_map(|u| u.to_be_bytes())
        .collect();

    out.push('&');
    let mut acc: u32 = 0;
    let mut bits = 0u32;
    for b in bytes {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 6 {
            bits -= 6;
            let idx = ((acc >> bits) & 0x3F) as usize;
            out.push(char::from(ALPHABET[idx]));
        }
    }
    if bits > 0 {
        let idx = ((acc << (6 - bits)) & 0x3F) as usize;
        out.push(char::from(ALPHABET[idx]));
    }
    out.push('-');
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        assert_eq!(decode("INBOX").unwrap(), "INBOX");
        assert_eq!(encode("INBOX"), "INBOX");
    }

    #[test]
    fn literal_ampersand() {
        assert_eq!(decode("Tom &- Jerry").unwrap(), "Tom & Jerry");
        assert_eq!(encode("Tom & Jerry"), "Tom &- Jerry");
    }

    #[test]
    fn german_umlaut() {
        assert_eq!(decode("Entw&APw-rfe").unwrap(), "Entwürfe");
        assert_eq!(encode("Entwürfe"), "Entw&APw-rfe");
    }

    #[test]
    fn japanese_run() {
        assert_eq!(decode("&ZeVnLIqe-").unwrap(), "日本語");
        assert_eq!(encode("日本語"), "&ZeVnLIqe-");
    }

    #[test]
    fn round_trip_mixed() {
        for name in ["INBOX/Entwürfe", "a&b&c", "Семья", "mail/日本/2024"] {
            assert_eq!(decode(&encode(name)).unwrap(), name);
        }
    }

    #[test]
    fn unterminated_shift_is_an_error() {
        assert!(decode("Entw&APw").is_err());
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(decode("&A/w-").is_err());
    }
}
