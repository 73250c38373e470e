//! Connection engine for mail accounts.
//!
//! Sits between protocol crates ([`mailwire_imap`], [`mailwire_pop3`]) and
//! a UI or store layer. Each account gets one worker task owning its
//! socket; callers submit typed [`request::Request`]s over a channel and
//! observe results through per-request update channels and a broadcast
//! [`events::EventBus`].
//!
//! ```no_run
//! use mailwire_engine::{AccountConfig, MailEngine, Protocol, RequestKind};
//!
//! # async fn demo() {
//! let mut engine = MailEngine::new();
//! let config = AccountConfig::new("work", Protocol::Imap, "imap.example.com")
//!     .credentials("user", "secret");
//! engine.add_account(config);
//!
//! let account = engine.account("work").unwrap();
//! let mut updates = account.submit(RequestKind::FolderTree, true);
//! while let Some(update) = updates.recv().await {
//!     if update.is_final {
//!         break;
//!     }
//! }
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
mod error;
pub mod events;
pub mod folder;
pub mod handler;
pub mod mailbox;
pub mod message;
pub mod refresh;
pub mod request;
pub mod token;

pub use client::ProtocolClient;
pub use config::{AccountConfig, DEFAULT_FOLDER_MESSAGE_LIMIT, Protocol, Security};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventBus, Progress};
pub use folder::{FolderTreeItem, FolderType, build_tree};
pub use handler::{AccountHandle, ConnectionState};
pub use mailbox::{ExpungeReport, MailboxCounters, MailboxState};
pub use message::{FolderMessage, MessageEnvelope, MessageFlags};
pub use refresh::{Reconciler, RefreshOutcome};
pub use request::{Request, RequestKind, RequestUpdate, ResultPayload};
pub use token::{MessageToken, ProviderUid};

use std::collections::HashMap;

/// Registry of running account workers.
#[derive(Debug, Default)]
pub struct MailEngine {
    accounts: HashMap<String, AccountHandle>,
}

impl MailEngine {
    /// Creates an engine with no accounts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a worker for the account; replaces and shuts down any
    /// previous worker registered under the same name.
    pub fn add_account(&mut self, config: AccountConfig) {
        let name = config.name.clone();
        let handle = AccountHandle::spawn(config);
        if let Some(previous) = self.accounts.insert(name, handle) {
            tokio::spawn(previous.shutdown());
        }
    }

    /// Looks up a running account by name.
    #[must_use]
    pub fn account(&self, name: &str) -> Option<&AccountHandle> {
        self.accounts.get(name)
    }

    /// Account names currently registered.
    pub fn account_names(&self) -> impl Iterator<Item = &str> {
        self.accounts.keys().map(String::as_str)
    }

    /// Shuts down one account's worker, draining its queue first.
    pub async fn remove_account(&mut self, name: &str) -> bool {
        match self.accounts.remove(name) {
            Some(handle) => {
                handle.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Shuts down every account.
    pub async fn shutdown(&mut self) {
        for (_, handle) in self.accounts.drain() {
            handle.shutdown().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_registry_round_trip() {
        let mut engine = MailEngine::new();
        let config =
            AccountConfig::new("work", Protocol::Imap, "unreachable.invalid").credentials("u", "p");
        engine.add_account(config);

        assert!(engine.account("work").is_some());
        assert_eq!(engine.account_names().count(), 1);

        assert!(engine.remove_account("work").await);
        assert!(!engine.remove_account("work").await);
    }
}
