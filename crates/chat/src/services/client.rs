//! Task that drives a [`ChatConnectionManager`].
//!
//! Caller commands, transport events and the reconnect timer are all handled
//! by one spawned task, so the manager never sees two of them at once.

use std::future::pending;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::manager::ChatConnectionManager;
use crate::transport::TaggedEvent;
use crate::types::{ChatError, ChatResult, ConnectionState, ConversationId, InboundMessage};

#[derive(Debug)]
enum Command {
    Connect(ConversationId),
    Send {
        content: String,
        customer: Option<String>,
    },
    Snapshot(oneshot::Sender<Vec<InboundMessage>>),
    Close,
}

/// Handle to a running chat connection.
///
/// Dropping the handle disposes the connection.
pub struct ChatClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    inbound: broadcast::Sender<InboundMessage>,
    task: JoinHandle<()>,
}

impl ChatClient {
    /// Move `manager` onto its own task. Must be called inside a tokio runtime.
    pub fn spawn(mut manager: ChatConnectionManager) -> ChatResult<Self> {
        let events = manager
            .take_event_stream()
            .ok_or_else(|| ChatError::configuration("manager event stream already taken"))?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let state = manager.watch_state();
        let inbound = manager.inbound_sender();

        let task = tokio::spawn(drive(manager, command_rx, events));

        Ok(Self {
            commands,
            state,
            inbound,
            task,
        })
    }

    pub fn connect(&self, conversation_id: impl Into<ConversationId>) {
        self.dispatch(Command::Connect(conversation_id.into()));
    }

    /// Fire-and-forget; dropped with a warning when the socket is not open.
    pub fn send(&self, content: impl Into<String>, customer: Option<&str>) {
        self.dispatch(Command::Send {
            content: content.into(),
            customer: customer.map(str::to_string),
        });
    }

    /// Dispose the connection. No reconnect happens afterwards.
    pub fn close(&self) {
        self.dispatch(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Snapshot of the message log; empty once disposed.
    pub async fn messages(&self) -> Vec<InboundMessage> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(Command::Snapshot(reply)).is_err() {
            return Vec::new();
        }
        response.await.unwrap_or_default()
    }

    /// Wait until the state satisfies `predicate`. Returns `None` if the
    /// driving task ended first.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        let mut state = self.state.clone();
        let result = state.wait_for(predicate).await.ok().map(|current| *current);
        result
    }

    /// Wait for the driving task to finish after [`ChatClient::close`].
    pub async fn join(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(error) = task.await {
            warn!(%error, "chat connection task failed");
        }
    }

    fn dispatch(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("chat connection task has already stopped");
        }
    }
}

async fn drive(
    mut manager: ChatConnectionManager,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: mpsc::UnboundedReceiver<TaggedEvent>,
) {
    loop {
        let deadline = manager.reconnect_deadline();

        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect(conversation_id)) => {
                    if let Err(error) = manager.connect(conversation_id) {
                        warn!(%error, "connect request failed");
                    }
                }
                Some(Command::Send { content, customer }) => {
                    let _ = manager.send(&content, customer.as_deref());
                }
                Some(Command::Snapshot(reply)) => {
                    let _ = reply.send(manager.messages().to_vec());
                }
                Some(Command::Close) | None => {
                    manager.close();
                    break;
                }
            },
            Some(tagged) = events.recv() => manager.handle_event(tagged),
            _ = wait_until(deadline) => {
                if let Some(deadline) = deadline {
                    manager.fire_reconnect(deadline);
                }
            }
        }
    }

    debug!("chat connection task finished");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
