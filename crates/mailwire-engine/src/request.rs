//! Typed units of work submitted to an account's worker.

use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::message::FolderMessage;
use crate::token::MessageToken;

/// Operation requested of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// List the account's folder hierarchy.
    FolderTree,
    /// Refresh message/unseen counts for the named folders.
    FolderStatus {
        /// Decoded folder paths.
        folders: Vec<String>,
    },
    /// Fetch envelope summaries for a contiguous index range of a folder.
    FolderMessagesRange {
        /// Decoded folder path.
        folder: String,
        /// 1-based first index, inclusive.
        first: u32,
        /// 1-based last index, inclusive.
        last: u32,
    },
    /// Fetch envelope summaries for an explicit set of known messages.
    FolderMessagesSet {
        /// Decoded folder path.
        folder: String,
        /// Messages to (re-)fetch.
        tokens: Vec<MessageToken>,
    },
    /// Fetch envelope summaries for messages that arrived since the last
    /// look at the folder.
    FolderMessagesRecent {
        /// Decoded folder path.
        folder: String,
    },
    /// Run the two-phase cache reconciliation for a folder.
    FolderRefresh {
        /// Decoded folder path.
        folder: String,
        /// Tokens currently cached for the folder, used to seed the
        /// orphan-candidate set.
        cached: Vec<MessageToken>,
    },
    /// Fetch one message's full body.
    MessageFetch {
        /// Message to fetch.
        token: MessageToken,
    },
    /// Fetch one message's body structure, or the content of one part.
    MessageParts {
        /// Message to inspect.
        token: MessageToken,
        /// Part address to download, or `None` for the structure tree.
        part_address: Option<String>,
    },
    /// Mark a message deleted.
    MessageDelete {
        /// Target message.
        token: MessageToken,
    },
    /// Clear a message's deleted flag.
    MessageUndelete {
        /// Target message.
        token: MessageToken,
    },
    /// Set or clear the answered flag.
    MessageAnswered {
        /// Target message.
        token: MessageToken,
        /// Desired flag value.
        answered: bool,
    },
    /// Set or clear the forwarded keyword.
    MessageForwarded {
        /// Target message.
        token: MessageToken,
        /// Desired flag value.
        forwarded: bool,
    },
    /// Upload a complete message into a folder.
    MessageAppend {
        /// Destination folder path.
        folder: String,
        /// Raw RFC 822 message bytes.
        raw: Vec<u8>,
        /// Whether to store it flagged as already read.
        seen: bool,
    },
    /// Server-side copy of a message into another folder.
    MessageCopy {
        /// Source message.
        token: MessageToken,
        /// Destination folder path.
        destination: String,
    },
    /// Turn IDLE mode on or off for the account.
    SetIdleEnabled {
        /// Desired setting.
        enabled: bool,
    },
    /// Log out and close the connection.
    Disconnect,
}

impl RequestKind {
    /// True for requests that can be satisfied without a live connection
    /// and therefore never force a Closed to Opening transition.
    ///
    /// Pure: examines only the variant. Whether an administrative request
    /// additionally bypasses work for the currently idled folder is the
    /// worker's decision, made where the worker's state lives.
    #[must_use]
    pub const fn is_administrative(&self) -> bool {
        matches!(self, Self::SetIdleEnabled { .. } | Self::Disconnect)
    }
}

/// Result payload delivered with a request update.
#[derive(Debug, Clone)]
pub enum ResultPayload {
    /// Flat folder listing: `(path, delimiter, selectable)` per folder.
    FolderTree(Vec<crate::folder::FolderTreeItem>),
    /// Counts per folder: `(path, total, unseen)`; folders the server
    /// refused are absent.
    FolderStatus(Vec<(String, u32, u32)>),
    /// One batch of envelope summaries.
    Messages(Vec<FolderMessage>),
    /// Refresh outcome for a folder.
    Refresh(crate::refresh::RefreshOutcome),
    /// A complete raw message body.
    MessageBody {
        /// The message fetched.
        token: MessageToken,
        /// Raw RFC 822 bytes.
        raw: Vec<u8>,
    },
    /// A message's MIME structure tree.
    Structure {
        /// The message inspected.
        token: MessageToken,
        /// Parsed part tree.
        part: mailwire_imap::MessagePart,
    },
    /// Decoded content of one MIME part.
    PartContent {
        /// The message inspected.
        token: MessageToken,
        /// Part address that was downloaded.
        part_address: String,
        /// Transfer-encoded bytes as stored on the server.
        raw: Vec<u8>,
    },
    /// Updated flags for messages touched by a flag operation.
    FlagsChanged(Vec<FolderMessage>),
    /// Acknowledgement with no payload (append, copy, delete on POP3,
    /// administrative requests).
    Done,
}

/// One completion or partial-result callback for a request.
///
/// A request may receive any number of updates with `is_final == false`
/// (one per message in a batch, say) but exactly one with
/// `is_final == true`, which is always the last.
#[derive(Debug)]
pub struct RequestUpdate {
    /// Payload, or the failure that ended the request.
    pub result: Result<ResultPayload, EngineError>,
    /// Whether this is the terminal notification for the request.
    pub is_final: bool,
}

impl RequestUpdate {
    /// A non-final partial result.
    #[must_use]
    pub fn partial(payload: ResultPayload) -> Self {
        Self {
            result: Ok(payload),
            is_final: false,
        }
    }

    /// The terminal success notification.
    #[must_use]
    pub fn done(payload: ResultPayload) -> Self {
        Self {
            result: Ok(payload),
            is_final: true,
        }
    }

    /// The terminal failure notification.
    #[must_use]
    pub fn failed(error: EngineError) -> Self {
        Self {
            result: Err(error),
            is_final: true,
        }
    }
}

/// A queued unit of work.
#[derive(Debug)]
pub struct Request {
    /// Operation to perform.
    pub kind: RequestKind,
    /// True when the user asked for this directly; failures of deliberate
    /// requests are broadcast, background failures only logged.
    pub deliberate: bool,
    /// Channel the worker delivers updates on. Dropped receivers are
    /// fine; the worker does not care whether anyone is listening.
    pub updates: mpsc::UnboundedSender<RequestUpdate>,
}

impl Request {
    /// Creates a request and the receiving half of its update channel.
    #[must_use]
    pub fn new(kind: RequestKind, deliberate: bool) -> (Self, mpsc::UnboundedReceiver<RequestUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                kind,
                deliberate,
                updates: tx,
            },
            rx,
        )
    }

    /// Sends an update, ignoring a dropped receiver.
    pub fn send(&self, update: RequestUpdate) {
        let _ = self.updates.send(update);
    }

    /// Fails the request terminally.
    pub fn fail(&self, error: EngineError) {
        self.send(RequestUpdate::failed(error));
    }
}
