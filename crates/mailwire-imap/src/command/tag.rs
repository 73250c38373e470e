//! Per-session command tags.

/// Monotonic tag generator: `A0`, `A1`, `A2`, ...
///
/// One per session; a tag is never reused within a connection, which is what
/// lets interleaved untagged traffic be correlated back to its command.
#[derive(Debug, Default)]
pub struct TagSequence {
    next: u64,
}

impl TagSequence {
    /// Creates a sequence starting at `A0`.
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns the next unused tag.
    pub fn next_tag(&mut self) -> String {
        let tag = format!("A{}", self.next);
        self.next += 1;
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_sequential() {
        let mut seq = TagSequence::new();
        assert_eq!(seq.next_tag(), "A0");
        assert_eq!(seq.next_tag(), "A1");
        assert_eq!(seq.next_tag(), "A2");
    }
}
