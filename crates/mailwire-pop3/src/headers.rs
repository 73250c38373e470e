//! RFC 822 header parsing.
//!
//! POP3 has no ENVELOPE equivalent, so message-list rows are synthesized
//! from the header block a `TOP n 0` returns.

use chrono::{DateTime, FixedOffset};

/// Unfolded message headers with case-insensitive lookup.
#[derive(Debug, Clone, Default)]
pub struct HeaderBlock {
    fields: Vec<(String, String)>,
}

impl HeaderBlock {
    /// Parses a raw header block.
    ///
    /// Folded continuation lines (leading space or tab) are joined onto
    /// the previous field with a single space. Lines without a colon are
    /// skipped; a malformed header must not lose the rest of the block.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        let mut fields: Vec<(String, String)> = Vec::new();

        for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
            if line.is_empty() {
                // Blank line ends the header section.
                break;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, value)) = fields.last_mut() {
                    value.push(' ');
                    value.push_str(line.trim_start());
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                tracing::debug!(line, "skipping malformed header line");
                continue;
            };
            fields.push((name.trim().to_string(), value.trim().to_string()));
        }

        Self { fields }
    }

    /// Returns the first value of the named header, case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Synthesizes envelope-shaped data from the standard headers.
    #[must_use]
    pub fn to_summary(&self) -> HeaderSummary {
        HeaderSummary {
            from: self.get("From").map(str::to_string),
            to: self.get("To").map(str::to_string),
            cc: self.get("Cc").map(str::to_string),
            reply_to: self.get("Reply-To").map(str::to_string),
            subject: self.get("Subject").map(str::to_string),
            date: self
                .get("Date")
                .and_then(|d| DateTime::parse_from_rfc2822(d).ok()),
            message_id: self.get("Message-ID").map(str::to_string),
            in_reply_to: self.get("In-Reply-To").map(str::to_string),
        }
    }
}

/// Envelope-shaped data pulled from a header block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSummary {
    /// `From:` as written.
    pub from: Option<String>,
    /// `To:` as written.
    pub to: Option<String>,
    /// `Cc:` as written.
    pub cc: Option<String>,
    /// `Reply-To:` as written.
    pub reply_to: Option<String>,
    /// `Subject:` as written.
    pub subject: Option<String>,
    /// Parsed `Date:`, when it is valid RFC 2822.
    pub date: Option<DateTime<FixedOffset>>,
    /// `Message-ID:` as written.
    pub message_id: Option<String>,
    /// `In-Reply-To:` as written.
    pub in_reply_to: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"From: Ann <ann@example.com>\r\n\
        To: bob@example.org\r\n\
        Subject: Quarterly numbers,\r\n\
        \tfinal draft\r\n\
        Date: Mon, 1 Jan 2024 10:00:00 +0100\r\n\
        Message-ID: <abc@example.com>\r\n\
        \r\n\
        Body starts here: not a header\r\n";

    #[test]
    fn lookup_is_case_insensitive() {
        let headers = HeaderBlock::parse(SAMPLE);
        assert_eq!(headers.get("from"), Some("Ann <ann@example.com>"));
        assert_eq!(headers.get("SUBJECT"), headers.get("Subject"));
    }

    #[test]
    fn folded_subject_is_joined() {
        let headers = HeaderBlock::parse(SAMPLE);
        assert_eq!(
            headers.get("Subject"),
            Some("Quarterly numbers, final draft")
        );
    }

    #[test]
    fn body_after_blank_line_is_ignored() {
        let headers = HeaderBlock::parse(SAMPLE);
        assert!(headers.get("Body starts here").is_none());
    }

    #[test]
    fn summary_parses_date() {
        let summary = HeaderBlock::parse(SAMPLE).to_summary();
        let date = summary.date.unwrap();
        assert_eq!(date.timestamp(), 1_704_099_600);
        assert_eq!(summary.message_id.as_deref(), Some("<abc@example.com>"));
    }

    #[test]
    fn bad_date_degrades_to_none() {
        let headers = HeaderBlock::parse(b"Date: not a date\r\n\r\n");
        assert!(headers.to_summary().date.is_none());
    }
}
