//! Closed set of protocol backends.
//!
//! Every protocol-specific difference the worker cares about lives behind
//! this enum as an ordinary method, so dispatch sites match on the variant
//! instead of probing capabilities through downcasts.

use mailwire_imap::{ImapSession, ImapStream, connect_plain, connect_tls};
use mailwire_pop3::Pop3Session;
use mailwire_pop3::Pop3Stream;

use crate::config::{AccountConfig, Protocol, Security};
use crate::error::{EngineError, Result};

/// A logged-in protocol session for one account.
pub enum ProtocolClient {
    /// IMAP backend.
    Imap(ImapSession<ImapStream>),
    /// POP3 backend.
    Pop(Pop3Session<Pop3Stream>),
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Imap(_) => f.write_str("ProtocolClient::Imap"),
            Self::Pop(_) => f.write_str("ProtocolClient::Pop"),
        }
    }
}

impl ProtocolClient {
    /// Connects, reads the greeting, optionally upgrades the transport,
    /// and logs in.
    pub async fn connect(config: &AccountConfig) -> Result<Self> {
        if !config.has_credentials() {
            return Err(EngineError::LoginRequired);
        }
        match config.protocol {
            Protocol::Imap => Self::connect_imap(config).await,
            Protocol::Pop3 => Self::connect_pop(config).await,
        }
    }

    async fn connect_imap(config: &AccountConfig) -> Result<Self> {
        let stream = match config.security {
            Security::Implicit => connect_tls(&config.host, config.port).await?,
            Security::StartTls | Security::None => {
                connect_plain(&config.host, config.port).await?
            }
        };
        let mut session = ImapSession::new(stream);
        session.greeting().await?;
        if config.security == Security::StartTls {
            session = session.start_tls(&config.host).await?;
        }
        session.login(&config.username, &config.password).await?;
        if session.capabilities().is_empty() {
            let _ = session.capability().await?;
        }
        Ok(Self::Imap(session))
    }

    async fn connect_pop(config: &AccountConfig) -> Result<Self> {
        let stream = match config.security {
            Security::Implicit => {
                mailwire_pop3::connect_tls(&config.host, config.port).await?
            }
            // POP3 STLS is not implemented; treat it as cleartext.
            Security::StartTls | Security::None => {
                mailwire_pop3::connect_plain(&config.host, config.port).await?
            }
        };
        let mut session = Pop3Session::new(stream);
        session.greeting().await?;
        session.login(&config.username, &config.password).await?;
        Ok(Self::Pop(session))
    }

    /// Whether the session can enter server-push IDLE.
    #[must_use]
    pub fn supports_idle(&self) -> bool {
        match self {
            Self::Imap(session) => session.capabilities().supports_idle(),
            Self::Pop(_) => false,
        }
    }

    /// Whether folders other than the inbox exist only locally.
    ///
    /// POP3 exposes a single server-side maildrop; every other folder is a
    /// cache-only construct and must never be refreshed from the network.
    #[must_use]
    pub const fn has_locked_folders(&self) -> bool {
        matches!(self, Self::Pop(_))
    }

    /// Says goodbye and lets the transport close on drop.
    pub async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Imap(session) => session.logout().await?,
            Self::Pop(session) => session.quit().await?,
        }
        Ok(())
    }
}
