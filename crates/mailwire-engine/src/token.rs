//! Message identity tokens.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Protocol-specific unique identifier carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderUid {
    /// IMAP UID, stable while UIDVALIDITY holds.
    Imap(u32),
    /// POP3 UIDL string, stable across sessions.
    Pop(String),
    /// Local-store identifier; the message exists only in the cache.
    Local(String),
}

impl fmt::Display for ProviderUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imap(uid) => write!(f, "{uid}"),
            Self::Pop(uid) | Self::Local(uid) => f.write_str(uid),
        }
    }
}

/// Identity handle for a message.
///
/// Equality, ordering and hashing cover only the folder path and provider
/// UID. The sequence index is volatile: it shifts whenever the server
/// expunges a lower-indexed message, and it is updated in place via
/// [`Self::update_index`] without disturbing the token's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToken {
    folder_path: String,
    uid: ProviderUid,
    /// 1-based sequence index in the currently selected mailbox. Zero when
    /// unknown (never selected, or protocol without sequence numbers).
    index: u32,
}

impl MessageToken {
    /// Creates a token for a message in a folder.
    #[must_use]
    pub fn new(folder_path: impl Into<String>, uid: ProviderUid) -> Self {
        Self {
            folder_path: folder_path.into(),
            uid,
            index: 0,
        }
    }

    /// Creates a token with a known sequence index.
    #[must_use]
    pub fn with_index(folder_path: impl Into<String>, uid: ProviderUid, index: u32) -> Self {
        Self {
            folder_path: folder_path.into(),
            uid,
            index,
        }
    }

    /// Folder path this message lives in (decoded form).
    #[must_use]
    pub fn folder_path(&self) -> &str {
        &self.folder_path
    }

    /// Provider-assigned unique id.
    #[must_use]
    pub const fn uid(&self) -> &ProviderUid {
        &self.uid
    }

    /// Current volatile sequence index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Updates the volatile index in place. Identity is unaffected.
    pub const fn update_index(&mut self, index: u32) {
        self.index = index;
    }

    /// True when the token is sufficient to fetch from the live server;
    /// a local-only token can be loaded solely from the cache.
    #[must_use]
    pub const fn is_loadable(&self) -> bool {
        match self.uid {
            ProviderUid::Imap(uid) => uid > 0,
            ProviderUid::Pop(_) => true,
            ProviderUid::Local(_) => false,
        }
    }
}

impl PartialEq for MessageToken {
    fn eq(&self, other: &Self) -> bool {
        self.folder_path == other.folder_path && self.uid == other.uid
    }
}

impl Eq for MessageToken {}

impl Hash for MessageToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.folder_path.hash(state);
        self.uid.hash(state);
    }
}
