//! Per-account connection worker.
//!
//! One task owns each account's socket, protocol session, and mailbox
//! state. Everything else talks to it through the request channel and
//! listens on the event bus; nothing outside the task ever touches the
//! connection. The task runs the connection state machine:
//!
//! ```text
//! Closed -> Opening -> Opened -> ProcessingRequests <-> Idle
//!                                        |
//!                                     Closing -> Closed
//! ```
//!
//! Shutdown is cooperative. The flag is observed at the queue-wait points;
//! in-flight requests always finish, and a shutdown observed in Closed
//! with an empty queue ends the task without ever opening a connection.

mod dispatch;

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use mailwire_imap::NoopSummary;

use crate::client::ProtocolClient;
use crate::config::AccountConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::mailbox::MailboxState;
use crate::request::{Request, RequestKind, RequestUpdate};

/// Where the worker is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; waiting for work.
    Closed,
    /// Connecting and authenticating.
    Opening,
    /// Authenticated; post-login setup.
    Opened,
    /// Draining the request queue.
    ProcessingRequests,
    /// Connected with an empty queue, watching for new mail.
    Idle,
    /// Logging out.
    Closing,
}

/// Queue poll cadence while idling.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Longest stretch without talking to the server while idling.
const IDLE_CEILING: Duration = Duration::from_secs(5 * 60);

/// What woke the worker out of Idle.
enum IdleWake {
    Request(Option<Request>),
    Shutdown,
    NewMail,
    Expunge(Vec<u32>),
    Ceiling,
}

/// What the post-ceiling NOOP calls for.
#[derive(Debug, PartialEq, Eq)]
enum NoopFollowUp {
    NewMail,
    ReselectInbox,
    Nothing,
}

/// New mail is signaled only by a RECENT line; a NOOP whose response
/// carries no RECENT at all, while a folder other than INBOX is selected,
/// means attention should return to INBOX.
fn noop_follow_up(summary: &NoopSummary, selected: Option<&str>) -> NoopFollowUp {
    if summary.has_new_mail() {
        NoopFollowUp::NewMail
    } else if summary.recent.is_none() && selected.is_some_and(|f| f != "INBOX") {
        NoopFollowUp::ReselectInbox
    } else {
        NoopFollowUp::Nothing
    }
}

/// Client-side handle to one account's worker task.
#[derive(Debug)]
pub struct AccountHandle {
    requests: mpsc::UnboundedSender<Request>,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
    events: EventBus,
    join: JoinHandle<()>,
}

impl AccountHandle {
    /// Spawns the worker for an account.
    #[must_use]
    pub fn spawn(config: AccountConfig) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Closed);
        let events = EventBus::new();
        let worker = ConnectionHandler {
            config,
            events: events.clone(),
            state: state_tx,
            requests: request_rx,
            shutdown: shutdown_rx,
            pending: VecDeque::new(),
            client: None,
            mailbox: MailboxState::new(),
            selected: None,
            idle_enabled: true,
            push_folder: None,
            new_mail_raced: false,
        };
        let join = tokio::spawn(worker.run());
        Self {
            requests: request_tx,
            shutdown: shutdown_tx,
            state: state_rx,
            events,
            join,
        }
    }

    /// Submits a request; updates arrive on the returned channel.
    ///
    /// Fails immediately with [`EngineError::Abandoned`] if the worker has
    /// already shut down.
    pub fn submit(
        &self,
        kind: RequestKind,
        deliberate: bool,
    ) -> mpsc::UnboundedReceiver<RequestUpdate> {
        let (request, rx) = Request::new(kind, deliberate);
        if let Err(rejected) = self.requests.send(request) {
            rejected.0.fail(EngineError::Abandoned);
        }
        rx
    }

    /// Subscribes to the account's event bus.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Read-only view of the connection state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Signals shutdown and waits for the queue to drain and the worker
    /// to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        drop(self.requests);
        let _ = self.join.await;
    }
}

/// The worker task's owned half.
pub(crate) struct ConnectionHandler {
    pub(crate) config: AccountConfig,
    pub(crate) events: EventBus,
    state: watch::Sender<ConnectionState>,
    requests: mpsc::UnboundedReceiver<Request>,
    shutdown: watch::Receiver<bool>,
    pub(crate) pending: VecDeque<Request>,
    pub(crate) client: Option<ProtocolClient>,
    pub(crate) mailbox: MailboxState,
    /// Decoded path of the currently selected folder, IMAP only.
    pub(crate) selected: Option<String>,
    pub(crate) idle_enabled: bool,
    /// Folder covered by live server push, while in Idle.
    pub(crate) push_folder: Option<String>,
    /// A new-mail push arrived while other work was in flight.
    pub(crate) new_mail_raced: bool,
}

impl ConnectionHandler {
    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() != state {
            let _ = self.state.send(state);
            self.events.publish(EngineEvent::StateChanged { state });
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn run(mut self) {
        let mut state = ConnectionState::Closed;
        loop {
            self.set_state(state);
            state = match state {
                ConnectionState::Closed => {
                    if let Some(next) = self.run_closed().await {
                        next
                    } else {
                        break;
                    }
                }
                ConnectionState::Opening => self.run_opening().await,
                ConnectionState::Opened => ConnectionState::ProcessingRequests,
                ConnectionState::ProcessingRequests => self.run_processing().await,
                ConnectionState::Idle => self.run_idle().await,
                ConnectionState::Closing => {
                    self.run_closing().await;
                    if self.shutting_down() && self.pending.is_empty() {
                        self.set_state(ConnectionState::Closed);
                        break;
                    }
                    ConnectionState::Closed
                }
            };
        }
        self.abandon_queue();
    }

    /// Waits in Closed for work. `None` ends the task.
    async fn run_closed(&mut self) -> Option<ConnectionState> {
        loop {
            if self.shutting_down() && self.pending.is_empty() {
                return None;
            }
            if let Some(request) = self.pending.pop_front() {
                if request.kind.is_administrative() {
                    self.execute_administrative(request);
                    continue;
                }
                // Needs a connection; put it back and go open one.
                self.pending.push_front(request);
                return Some(ConnectionState::Opening);
            }
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => self.pending.push_back(request),
                    // All handles dropped; nothing can arrive anymore.
                    None => return None,
                },
                _ = self.shutdown.changed() => {}
            }
        }
    }

    async fn run_opening(&mut self) -> ConnectionState {
        match ProtocolClient::connect(&self.config).await {
            Ok(client) => {
                self.client = Some(client);
                self.selected = None;
                self.push_folder = None;
                self.mailbox = MailboxState::new();
                self.events.publish(EngineEvent::Status {
                    message: format!("connected to {}", self.config.host),
                });
                ConnectionState::Opened
            }
            // Close-out is centralized in Closing, even with no socket to
            // tear down, so watchers always observe the same transitions.
            Err(EngineError::LoginRequired) => {
                self.events.publish(EngineEvent::LoginPrompt);
                self.fail_pending(|| EngineError::LoginRequired);
                ConnectionState::Closing
            }
            Err(err) => {
                tracing::warn!(account = %self.config.name, error = %err, "connect failed");
                self.events.publish(EngineEvent::RequestFailed {
                    message: err.to_string(),
                    recoverable: !err.is_fatal(),
                });
                self.fail_pending(|| EngineError::Abandoned);
                ConnectionState::Closing
            }
        }
    }

    async fn run_processing(&mut self) -> ConnectionState {
        while let Some(request) = self.next_request() {
            if matches!(request.kind, RequestKind::Disconnect) {
                request.send(RequestUpdate::done(crate::request::ResultPayload::Done));
                return ConnectionState::Closing;
            }
            let fatal = self.execute(request).await;
            if fatal {
                return ConnectionState::Closing;
            }
        }
        if self.shutting_down() {
            return ConnectionState::Closing;
        }
        ConnectionState::Idle
    }

    /// Pops the next queued request, draining the channel first.
    fn next_request(&mut self) -> Option<Request> {
        while let Ok(request) = self.requests.try_recv() {
            self.pending.push_back(request);
        }
        self.pending.pop_front()
    }

    async fn run_idle(&mut self) -> ConnectionState {
        let wake = self.wait_in_idle().await;
        match wake {
            IdleWake::Request(Some(request)) => {
                self.pending.push_back(request);
                ConnectionState::ProcessingRequests
            }
            IdleWake::Request(None) | IdleWake::Shutdown => ConnectionState::Closing,
            IdleWake::NewMail => {
                let folder = self.selected.clone().unwrap_or_else(|| "INBOX".to_string());
                self.new_mail_raced = true;
                self.events.publish(EngineEvent::NewMail { folder });
                ConnectionState::Idle
            }
            IdleWake::Expunge(indices) => {
                for index in indices {
                    self.apply_expunge_and_publish(index);
                }
                ConnectionState::Idle
            }
            IdleWake::Ceiling => match self.final_noop_check().await {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(account = %self.config.name, error = %err, "idle poll failed");
                    ConnectionState::Closing
                }
            },
        }
    }

    /// Blocks until something interesting happens while Idle.
    async fn wait_in_idle(&mut self) -> IdleWake {
        let push = self.idle_enabled
            && self.config.idle_enabled
            && self.client.as_ref().is_some_and(ProtocolClient::supports_idle);

        if push {
            self.push_folder = self.selected.clone();
            return self.wait_for_push().await;
        }

        // Polling mode: no live push is watching any folder, so coverage
        // left over from an earlier push pass must not suppress refreshes.
        self.push_folder = None;

        // Short queue checks up to the server-contact ceiling.
        let deadline = tokio::time::Instant::now() + IDLE_CEILING;
        loop {
            if self.shutting_down() {
                return IdleWake::Shutdown;
            }
            tokio::select! {
                request = self.requests.recv() => return IdleWake::Request(request),
                _ = self.shutdown.changed() => return IdleWake::Shutdown,
                () = tokio::time::sleep(IDLE_POLL_INTERVAL) => {
                    if tokio::time::Instant::now() >= deadline {
                        return IdleWake::Ceiling;
                    }
                }
            }
        }
    }

    /// IDLE-push mode: parks in IDLE until the server pushes, a request
    /// arrives, or the ceiling passes.
    async fn wait_for_push(&mut self) -> IdleWake {
        use mailwire_imap::UntaggedResponse;

        let Some(ProtocolClient::Imap(session)) = &mut self.client else {
            return IdleWake::Ceiling;
        };
        let requests = &mut self.requests;
        let mut shutdown = self.shutdown.clone();

        let mut handle = match session.idle().await {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(error = %err, "entering idle failed");
                return IdleWake::Ceiling;
            }
        };

        let wake = tokio::select! {
            pushed = handle.wait() => match pushed {
                Ok(UntaggedResponse::Exists(_) | UntaggedResponse::Recent(_)) => IdleWake::NewMail,
                Ok(UntaggedResponse::Expunge(seq)) => IdleWake::Expunge(vec![seq.0]),
                Ok(_) => IdleWake::Ceiling,
                Err(err) => {
                    tracing::warn!(error = %err, "idle wait failed");
                    IdleWake::Shutdown
                }
            },
            request = requests.recv() => IdleWake::Request(request),
            _ = shutdown.changed() => IdleWake::Shutdown,
            () = tokio::time::sleep(IDLE_CEILING) => IdleWake::Ceiling,
        };

        if let Err(err) = handle.done().await {
            tracing::warn!(error = %err, "leaving idle failed");
            return IdleWake::Shutdown;
        }
        wake
    }

    /// The ceiling passed without server contact: one NOOP, then decide.
    async fn final_noop_check(&mut self) -> crate::Result<ConnectionState> {
        let summary = match &mut self.client {
            Some(ProtocolClient::Imap(session)) => session.noop().await?,
            Some(ProtocolClient::Pop(session)) => {
                // POP3 cannot see new mail mid-session; just keep alive.
                session.noop().await?;
                return Ok(ConnectionState::Idle);
            }
            None => return Ok(ConnectionState::Idle),
        };
        for seq in &summary.expunged {
            self.apply_expunge_and_publish(seq.0);
        }
        match noop_follow_up(&summary, self.selected.as_deref()) {
            NoopFollowUp::NewMail => {
                let folder = self.selected.clone().unwrap_or_else(|| "INBOX".to_string());
                self.new_mail_raced = true;
                self.events.publish(EngineEvent::NewMail { folder });
            }
            NoopFollowUp::ReselectInbox => {
                self.select_folder("INBOX").await?;
            }
            NoopFollowUp::Nothing => {}
        }
        Ok(ConnectionState::Idle)
    }

    /// Applies one expunged sequence number and fans out the removed
    /// token along with every shifted survivor.
    fn apply_expunge_and_publish(&mut self, index: u32) {
        let report = self.mailbox.apply_expunge(index);
        if let Some(token) = report.expunged {
            self.events.publish(EngineEvent::MessageChanged { token });
        }
        for token in report.updated {
            self.events.publish(EngineEvent::MessageChanged { token });
        }
    }

    async fn run_closing(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(err) = client.disconnect().await {
                tracing::debug!(error = %err, "logout failed");
            }
        }
        self.selected = None;
        self.push_folder = None;
        self.mailbox = MailboxState::new();
    }

    fn execute_administrative(&mut self, request: Request) {
        match request.kind {
            RequestKind::SetIdleEnabled { enabled } => {
                self.idle_enabled = enabled;
                request.send(RequestUpdate::done(crate::request::ResultPayload::Done));
            }
            RequestKind::Disconnect => {
                // Already disconnected when handled here.
                request.send(RequestUpdate::done(crate::request::ResultPayload::Done));
            }
            _ => request.fail(EngineError::Abandoned),
        }
    }

    fn fail_pending(&mut self, err: impl Fn() -> EngineError) {
        for request in self.pending.drain(..) {
            request.fail(err());
        }
    }

    /// Fails everything still queued when the task ends.
    fn abandon_queue(&mut self) {
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            self.pending.push_back(request);
        }
        self.fail_pending(|| EngineError::Abandoned);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::Protocol;
    use crate::token::{MessageToken, ProviderUid};

    /// A worker with its channels wired up but no task and no socket.
    fn bare_handler(
        idle_enabled: bool,
        push_folder: Option<&str>,
    ) -> (
        ConnectionHandler,
        mpsc::UnboundedSender<Request>,
        watch::Sender<bool>,
    ) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Idle);
        let handler = ConnectionHandler {
            config: AccountConfig::new("t", Protocol::Imap, "unreachable.invalid"),
            events: EventBus::new(),
            state: state_tx,
            requests: request_rx,
            shutdown: shutdown_rx,
            pending: VecDeque::new(),
            client: None,
            mailbox: MailboxState::new(),
            selected: Some("INBOX".to_string()),
            idle_enabled,
            push_folder: push_folder.map(str::to_string),
            new_mail_raced: false,
        };
        (handler, request_tx, shutdown_tx)
    }

    #[test]
    fn noop_follow_up_rules() {
        let quiet = NoopSummary::default();
        // No RECENT line at all, non-INBOX selected: go back to INBOX.
        assert_eq!(
            noop_follow_up(&quiet, Some("Archive")),
            NoopFollowUp::ReselectInbox
        );
        // Same response while INBOX is selected: nothing to do.
        assert_eq!(noop_follow_up(&quiet, Some("INBOX")), NoopFollowUp::Nothing);

        let zero_recent = NoopSummary {
            recent: Some(0),
            ..NoopSummary::default()
        };
        // RECENT 0 is present but empty: stay put.
        assert_eq!(
            noop_follow_up(&zero_recent, Some("Archive")),
            NoopFollowUp::Nothing
        );

        let new_mail = NoopSummary {
            recent: Some(2),
            ..NoopSummary::default()
        };
        assert_eq!(
            noop_follow_up(&new_mail, Some("Archive")),
            NoopFollowUp::NewMail
        );
    }

    #[tokio::test]
    async fn polling_idle_drops_stale_push_coverage() {
        // Push coverage left over from an earlier pass; idle is now off.
        let (mut handler, requests, _shutdown) = bare_handler(false, Some("INBOX"));
        let (request, _updates) = Request::new(RequestKind::FolderTree, true);
        requests.send(request).unwrap();

        let wake = handler.wait_in_idle().await;
        assert!(matches!(wake, IdleWake::Request(Some(_))));
        // A deliberate refresh while polling must reach the server.
        assert!(!handler.should_bypass_refresh("INBOX"));
    }

    #[test]
    fn expunge_publishes_removed_and_shifted_tokens() {
        let (mut handler, _requests, _shutdown) = bare_handler(true, None);
        handler.mailbox.seed([
            (1, MessageToken::new("INBOX", ProviderUid::Imap(10))),
            (2, MessageToken::new("INBOX", ProviderUid::Imap(20))),
            (3, MessageToken::new("INBOX", ProviderUid::Imap(30))),
        ]);
        let mut events = handler.events.subscribe();

        handler.apply_expunge_and_publish(2);

        let mut changed = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::MessageChanged { token } = event {
                changed.push(token.uid().clone());
            }
        }
        // The removed message and the survivor shifted down below it.
        assert!(changed.contains(&ProviderUid::Imap(20)));
        assert!(changed.contains(&ProviderUid::Imap(30)));
        assert!(!changed.contains(&ProviderUid::Imap(10)));
    }

    #[tokio::test]
    async fn failed_open_passes_through_closing() {
        let config = AccountConfig::new("t", Protocol::Imap, "unreachable.invalid")
            .credentials("u", "p");
        let handle = AccountHandle::spawn(config);
        let mut events = handle.events();

        let mut rx = handle.submit(RequestKind::FolderTree, true);
        let update = rx.recv().await.unwrap();
        assert!(update.result.is_err());

        // Close-out goes through Closing even when opening never produced
        // a connection.
        loop {
            if let EngineEvent::StateChanged {
                state: ConnectionState::Closing,
            } = events.recv().await.unwrap()
            {
                break;
            }
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_from_closed_never_opens() {
        let config = AccountConfig::new("t", Protocol::Imap, "unreachable.invalid")
            .credentials("u", "p");
        let handle = AccountHandle::spawn(config);
        let mut events = handle.events();

        handle.shutdown().await;

        // The worker exited without a single state transition; in
        // particular it never visited Opening.
        while let Ok(event) = events.try_recv() {
            if let EngineEvent::StateChanged { state } = event {
                assert_ne!(state, ConnectionState::Opening);
            }
        }
    }

    #[tokio::test]
    async fn administrative_request_handled_without_connection() {
        let config = AccountConfig::new("t", Protocol::Imap, "unreachable.invalid")
            .credentials("u", "p");
        let handle = AccountHandle::spawn(config);

        let mut rx = handle.submit(RequestKind::SetIdleEnabled { enabled: false }, true);
        let update = rx.recv().await.unwrap();
        assert!(update.is_final);
        assert!(update.result.is_ok());

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn missing_credentials_prompt_for_login() {
        let config = AccountConfig::new("t", Protocol::Imap, "unreachable.invalid");
        let handle = AccountHandle::spawn(config);
        let mut events = handle.events();

        let mut rx = handle.submit(RequestKind::FolderTree, true);
        let update = rx.recv().await.unwrap();
        assert!(matches!(update.result, Err(EngineError::LoginRequired)));

        let mut prompted = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::LoginPrompt) {
                prompted = true;
            }
        }
        assert!(prompted);

        handle.shutdown().await;
    }
}
