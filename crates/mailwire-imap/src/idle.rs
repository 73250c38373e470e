//! IDLE continuation handling (RFC 2177).

use tokio::io::{AsyncRead, AsyncWrite};

use crate::parser::{ServerResponse, UntaggedResponse};
use crate::session::ImapSession;
use crate::{Error, Result};

/// A session parked in IDLE.
///
/// While the handle lives, the server pushes unsolicited updates and no
/// other command may be issued; [`Self::done`] ends the exchange and
/// returns the session to command mode. The caller bounds [`Self::wait`]
/// with its own timeout and must call `done` before reusing the session.
pub struct IdleHandle<'a, S> {
    session: &'a mut ImapSession<S>,
    tag: String,
}

impl<'a, S> IdleHandle<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(session: &'a mut ImapSession<S>, tag: String) -> Self {
        Self { session, tag }
    }

    /// Waits for the next unsolicited update.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bye`] if the server disconnects mid-idle, or an
    /// I/O error if the transport drops.
    pub async fn wait(&mut self) -> Result<UntaggedResponse> {
        loop {
            match self.session.read_one().await? {
                ServerResponse::Untagged(UntaggedResponse::Bye { text }) => {
                    return Err(Error::Bye(text));
                }
                ServerResponse::Untagged(update) => return Ok(update),
                // Stray continuations or tagged noise are not update data.
                ServerResponse::Continuation(_) | ServerResponse::Tagged { .. } => {}
            }
        }
    }

    /// Sends DONE and drains through the IDLE command's tagged reply.
    pub async fn done(self) -> Result<()> {
        self.session.send_line(b"DONE\r\n").await?;
        self.session.finish_tag(&self.tag).await
    }
}
