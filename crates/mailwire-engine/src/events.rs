//! Account event broadcasting.
//!
//! Every observable happening on an account's connection is published on a
//! single broadcast channel. Subscribers come and go freely; a lagging
//! subscriber loses old events rather than stalling the worker.

use tokio::sync::broadcast;

use crate::handler::ConnectionState;
use crate::token::MessageToken;

/// Progress of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Network phase: cumulative bytes received for the operation.
    Bytes(u64),
    /// Processing phase: percent complete, 0..=100.
    Percent(u8),
}

/// Event published on an account's bus.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The connection state machine moved.
    StateChanged {
        /// New state.
        state: ConnectionState,
    },
    /// Progress of the currently executing request.
    Progress(Progress),
    /// A deliberate request failed. Background failures are logged but
    /// never published here.
    RequestFailed {
        /// Human-readable failure summary.
        message: String,
        /// Whether reconnecting could plausibly help.
        recoverable: bool,
    },
    /// Credentials are missing; the connection attempt is parked until
    /// they are supplied.
    LoginPrompt,
    /// New mail was observed in a folder (IDLE or NOOP poll).
    NewMail {
        /// Decoded folder path.
        folder: String,
    },
    /// The cached view of a folder is stale and must be refreshed before
    /// further message operations against it can be trusted.
    RefreshRequired {
        /// Decoded folder path.
        folder: String,
    },
    /// Flags changed server-side for a message outside any request.
    MessageChanged {
        /// The affected message.
        token: MessageToken,
    },
    /// Free-form connection status text for display.
    Status {
        /// Status line.
        message: String,
    },
}

/// Broadcast capacity; a subscriber this far behind starts losing events.
const EVENT_CAPACITY: usize = 256;

/// The account's event bus. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Subscribes; the receiver sees events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
