//! Per-account configuration.

use serde::{Deserialize, Serialize};

/// Incoming-mail protocol for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    /// IMAP4rev1.
    Imap,
    /// POP3.
    Pop3,
}

/// Transport security for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Security {
    /// Cleartext. Test servers only.
    None,
    /// Plaintext connect, then STARTTLS upgrade (IMAP only).
    StartTls,
    /// TLS from the first byte (ports 993/995).
    Implicit,
}

/// Default retention limit for a folder's local cache.
pub const DEFAULT_FOLDER_MESSAGE_LIMIT: usize = 100;

/// Configuration for one mail account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Display name, used in logs and events.
    pub name: String,
    /// Incoming protocol.
    pub protocol: Protocol,
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Transport security.
    pub security: Security,
    /// Login username. Blank means "prompt before connecting".
    pub username: String,
    /// Login password. Blank means "prompt before connecting".
    pub password: String,
    /// Retention limit: the most messages kept cached per folder. Refresh
    /// evicts the chronologically oldest beyond this.
    pub maximum_folder_messages: usize,
    /// Whether to use IDLE when the server supports it.
    pub idle_enabled: bool,
}

impl AccountConfig {
    /// Creates a configuration with protocol-typical defaults.
    #[must_use]
    pub fn new(name: impl Into<String>, protocol: Protocol, host: impl Into<String>) -> Self {
        let port = match protocol {
            Protocol::Imap => 993,
            Protocol::Pop3 => 995,
        };
        Self {
            name: name.into(),
            protocol,
            host: host.into(),
            port,
            security: Security::Implicit,
            username: String::new(),
            password: String::new(),
            maximum_folder_messages: DEFAULT_FOLDER_MESSAGE_LIMIT,
            idle_enabled: true,
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the transport security.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Sets the per-folder retention limit.
    #[must_use]
    pub const fn maximum_folder_messages(mut self, limit: usize) -> Self {
        self.maximum_folder_messages = limit;
        self
    }

    /// Enables or disables IDLE.
    #[must_use]
    pub const fn idle_enabled(mut self, enabled: bool) -> Self {
        self.idle_enabled = enabled;
        self
    }

    /// True when both credentials are present.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_protocol() {
        let imap = AccountConfig::new("work", Protocol::Imap, "imap.example.com");
        assert_eq!(imap.port, 993);
        let pop = AccountConfig::new("old", Protocol::Pop3, "pop.example.com");
        assert_eq!(pop.port, 995);
        assert!(!pop.has_credentials());
    }

    #[test]
    fn builder_chain() {
        let config = AccountConfig::new("work", Protocol::Imap, "h")
            .port(143)
            .security(Security::StartTls)
            .credentials("u", "p")
            .maximum_folder_messages(5);
        assert_eq!(config.port, 143);
        assert_eq!(config.maximum_folder_messages, 5);
        assert!(config.has_credentials());
    }
}
