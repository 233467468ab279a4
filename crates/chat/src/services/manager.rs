//! Chat connection manager.
//!
//! Owns at most one live transport, scoped to a conversation, and the
//! append-only log of messages received through it. Transport events are fed
//! in one at a time through [`ChatConnectionManager::handle_event`]; the only
//! timer is the pending reconnect, exposed as a deadline the driver sleeps
//! on. See [`super::client::ChatClient`] for the task that drives it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;
use waterchat_config::{ChatConfig, MessageSchema};

use super::retry::{policy_from_config, FixedDelay, RetryPolicy};
use crate::transport::{
    Connector, TaggedEvent, TransportEvent, TransportEventSink, TransportLink, NORMAL_CLOSURE,
};
use crate::types::{
    ChatError, ChatResult, ConnectionState, ConversationId, InboundFrame, InboundMessage,
    OutboundMessage, SessionUser,
};
use crate::utils::time::TimeFormatter;

const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Invoked synchronously for every message appended to the log.
pub type MessageCallback = Box<dyn Fn(&InboundMessage) + Send + Sync>;

/// Build the socket URL for a conversation.
///
/// ```
/// use waterchat_chat::services::manager::chat_endpoint;
///
/// let url = chat_endpoint("ws://localhost:8000/", "42", true).unwrap();
/// assert_eq!(url.as_str(), "ws://localhost:8000/chat?convo_id=42");
///
/// let plain = chat_endpoint("ws://localhost:8000", "42", false).unwrap();
/// assert_eq!(plain.as_str(), "ws://localhost:8000/chat");
/// ```
pub fn chat_endpoint(base_url: &str, conversation_id: &str, with_query: bool) -> ChatResult<Url> {
    let raw = format!("{}/chat", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&raw).map_err(|error| ChatError::invalid_endpoint(raw.clone(), error))?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ChatError::invalid_endpoint(raw, "scheme must be ws or wss"));
    }

    if with_query {
        url.query_pairs_mut().append_pair("convo_id", conversation_id);
    }

    Ok(url)
}

/// Everything the manager needs besides the connector and the session.
pub struct ManagerOptions {
    pub base_url: String,
    pub schema: MessageSchema,
    pub conversation_query: bool,
    pub reconnect_on_normal_close: bool,
    pub retry: Box<dyn RetryPolicy>,
    pub formatter: TimeFormatter,
}

impl ManagerOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            schema: MessageSchema::Standard,
            conversation_query: true,
            reconnect_on_normal_close: true,
            retry: Box::new(FixedDelay::default()),
            formatter: TimeFormatter::default(),
        }
    }

    pub fn from_config(config: &ChatConfig) -> ChatResult<Self> {
        Ok(Self {
            base_url: config.base_url.clone(),
            schema: config.schema,
            conversation_query: config.conversation_query,
            reconnect_on_normal_close: config.reconnect.on_normal_close,
            retry: policy_from_config(&config.reconnect),
            formatter: TimeFormatter::from_config(&config.display)?,
        })
    }

    pub fn with_schema(mut self, schema: MessageSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_conversation_query(mut self, enabled: bool) -> Self {
        self.conversation_query = enabled;
        self
    }

    pub fn with_reconnect_on_normal_close(mut self, enabled: bool) -> Self {
        self.reconnect_on_normal_close = enabled;
        self
    }

    pub fn with_retry(mut self, retry: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(retry);
        self
    }

    pub fn with_formatter(mut self, formatter: TimeFormatter) -> Self {
        self.formatter = formatter;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Connecting,
    Open,
}

/// One transport plus the generation that tags its events.
#[derive(Debug)]
struct ConnectionHandle {
    generation: u64,
    link: TransportLink,
    state: HandleState,
}

#[derive(Debug, Clone, Copy)]
struct PendingReconnect {
    deadline: Instant,
    attempt: u32,
}

pub struct ChatConnectionManager {
    connector: Arc<dyn Connector>,
    session: SessionUser,
    options: ManagerOptions,
    handle: Option<ConnectionHandle>,
    conversation_id: Option<ConversationId>,
    log: Vec<InboundMessage>,
    callback: Option<MessageCallback>,
    reconnect: Option<PendingReconnect>,
    failed_attempts: u32,
    next_generation: u64,
    state: watch::Sender<ConnectionState>,
    inbound: broadcast::Sender<InboundMessage>,
    events_tx: mpsc::UnboundedSender<TaggedEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TaggedEvent>>,
}

impl ChatConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, session: SessionUser, options: ManagerOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (inbound, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            connector,
            session,
            options,
            handle: None,
            conversation_id: None,
            log: Vec::new(),
            callback: None,
            reconnect: None,
            failed_attempts: 0,
            next_generation: 0,
            state,
            inbound,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Register the per-message callback, replacing any previous one.
    pub fn on_message(&mut self, callback: impl Fn(&InboundMessage) + Send + Sync + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// The queue all transports report into. Can be taken once.
    pub fn take_event_stream(&mut self) -> Option<mpsc::UnboundedReceiver<TaggedEvent>> {
        self.events_rx.take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    pub(crate) fn inbound_sender(&self) -> broadcast::Sender<InboundMessage> {
        self.inbound.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.state == HandleState::Open)
    }

    pub fn messages(&self) -> &[InboundMessage] {
        &self.log
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Deadline of the pending reconnect, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect.map(|pending| pending.deadline)
    }

    /// Consecutive reconnect attempts since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Open a transport for `conversation_id`.
    ///
    /// A no-op when already open on the same conversation. Any other existing
    /// transport is closed and replaced.
    pub fn connect(&mut self, conversation_id: impl Into<ConversationId>) -> ChatResult<()> {
        let conversation_id = conversation_id.into();

        if self.state() == ConnectionState::Disposed {
            warn!(conversation_id, "connect called on a disposed chat connection");
            return Err(ChatError::Disposed);
        }

        if self.is_connected() && self.conversation_id.as_deref() == Some(conversation_id.as_str()) {
            debug!(conversation_id, "chat connection already open");
            return Ok(());
        }

        self.failed_attempts = 0;
        self.open_transport(conversation_id)
    }

    fn open_transport(&mut self, conversation_id: ConversationId) -> ChatResult<()> {
        let endpoint = chat_endpoint(
            &self.options.base_url,
            &conversation_id,
            self.options.conversation_query,
        )?;

        self.cancel_reconnect();
        if let Some(previous) = self.handle.take() {
            debug!(generation = previous.generation, "replacing chat transport");
            previous.link.close();
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = TransportEventSink::new(generation, self.events_tx.clone());
        let link = self.connector.open(&endpoint, sink);

        info!(conversation_id, generation, %endpoint, "opening chat connection");

        self.handle = Some(ConnectionHandle {
            generation,
            link,
            state: HandleState::Connecting,
        });
        self.conversation_id = Some(conversation_id);
        self.set_state(ConnectionState::Connecting);
        Ok(())
    }

    /// Apply one transport event. Events from replaced transports are dropped.
    pub fn handle_event(&mut self, tagged: TaggedEvent) {
        let current = self.handle.as_ref().map(|handle| handle.generation);
        if current != Some(tagged.generation) {
            trace!(generation = tagged.generation, ?current, "ignoring stale transport event");
            return;
        }

        match tagged.event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(raw) => self.on_frame(&raw),
            TransportEvent::Error(detail) => {
                warn!(generation = tagged.generation, %detail, "chat transport error");
            }
            TransportEvent::Close { code, reason } => self.on_close(code, &reason),
        }
    }

    fn on_open(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.state = HandleState::Open;
            info!(
                generation = handle.generation,
                conversation_id = ?self.conversation_id,
                "chat connection open"
            );
        }
        self.failed_attempts = 0;
        self.set_state(ConnectionState::Open);
    }

    fn on_frame(&mut self, raw: &str) {
        let frame = match InboundFrame::parse(raw) {
            Ok(frame) => frame,
            Err(error) => {
                let error = ChatError::from(error);
                warn!(%error, "dropping inbound chat frame");
                return;
            }
        };

        let sent_at = match frame.timestamp.as_ref().and_then(|stamp| stamp.to_utc()) {
            Some(instant) => instant,
            None => {
                debug!(timestamp = ?frame.timestamp, "inbound frame has no usable timestamp, using receipt time");
                Utc::now()
            }
        };

        let message = InboundMessage {
            timestamp: self.options.formatter.format(&sent_at),
            content: frame.content,
            sender_id: frame.sender_id,
            sender_name: frame.sender_name,
            role: frame.role,
            sent_at,
        };

        self.log.push(message.clone());
        if let Some(callback) = &self.callback {
            callback(&message);
        }
        let _ = self.inbound.send(message);
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str) {
        let generation = self.handle.take().map(|handle| handle.generation);
        self.cancel_reconnect();

        if code == Some(NORMAL_CLOSURE) && !self.options.reconnect_on_normal_close {
            info!(?generation, ?code, reason, "chat connection closed normally, not reconnecting");
            self.set_state(ConnectionState::Closed { reconnecting: false });
            return;
        }

        let attempt = self.failed_attempts.saturating_add(1);
        match self.options.retry.next_delay(attempt) {
            Some(delay) => {
                self.failed_attempts = attempt;
                self.reconnect = Some(PendingReconnect {
                    deadline: Instant::now() + delay,
                    attempt,
                });
                info!(
                    ?generation,
                    ?code,
                    reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "chat connection closed, reconnecting"
                );
                self.set_state(ConnectionState::Closed { reconnecting: true });
            }
            None => {
                warn!(?generation, ?code, attempt, "chat connection closed, giving up on reconnect");
                self.set_state(ConnectionState::Closed { reconnecting: false });
            }
        }
    }

    /// Run the reconnect scheduled for `deadline` if it is still the pending
    /// one and has come due. Returns whether a new transport was opened.
    pub fn fire_reconnect(&mut self, deadline: Instant) -> bool {
        let pending = match self.reconnect {
            Some(pending) if pending.deadline == deadline => pending,
            _ => return false,
        };

        if Instant::now() < pending.deadline {
            return false;
        }

        self.reconnect = None;
        let Some(conversation_id) = self.conversation_id.clone() else {
            return false;
        };

        debug!(attempt = pending.attempt, conversation_id, "reconnect timer fired");
        match self.open_transport(conversation_id) {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "reconnect failed to open a transport");
                self.set_state(ConnectionState::Closed { reconnecting: false });
                false
            }
        }
    }

    /// Fire the pending reconnect if it is due.
    pub fn poll_reconnect(&mut self) -> bool {
        match self.reconnect_deadline() {
            Some(deadline) => self.fire_reconnect(deadline),
            None => false,
        }
    }

    /// Write `content` to the open transport.
    ///
    /// Nothing is written, and nothing is queued, when the transport is not
    /// open or when `content` is blank once trimmed.
    pub fn send(&mut self, content: &str, customer: Option<&str>) -> ChatResult<()> {
        let Some(handle) = self
            .handle
            .as_ref()
            .filter(|handle| handle.state == HandleState::Open)
        else {
            warn!("socket not ready, message not sent");
            return Err(ChatError::SendWhileDisconnected);
        };

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let message = OutboundMessage::compose(self.options.schema, &self.session, customer, trimmed);
        let frame = message.to_frame().map_err(ChatError::Encode)?;

        if let Err(error) = handle.link.send_text(frame) {
            warn!(generation = handle.generation, %error, "failed to hand frame to transport");
            return Err(error);
        }

        debug!(
            generation = handle.generation,
            chars = message.content().chars().count(),
            "chat message sent"
        );

        Ok(())
    }

    /// Dispose: cancel any reconnect, close the transport, drop the log.
    /// The manager never reconnects afterwards.
    pub fn close(&mut self) {
        if self.state() == ConnectionState::Disposed {
            return;
        }

        self.cancel_reconnect();
        if let Some(handle) = self.handle.take() {
            handle.link.close();
        }
        self.log.clear();
        self.set_state(ConnectionState::Disposed);
        info!(conversation_id = ?self.conversation_id, "chat connection disposed");
    }

    fn cancel_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            debug!(attempt = pending.attempt, "cancelled pending reconnect");
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockConnector;
    use crate::types::Role;
    use std::time::Duration;

    fn customer() -> SessionUser {
        SessionUser {
            uid: "7".to_string(),
            area_id: None,
            firstname: Some("Lee".to_string()),
            lastname: Some("Chan".to_string()),
            name: None,
            role: Role::Customer,
        }
    }

    fn manager(connector: &MockConnector) -> ChatConnectionManager {
        ChatConnectionManager::new(
            Arc::new(connector.clone()),
            customer(),
            ManagerOptions::new("ws://chat.test"),
        )
    }

    fn pump(manager: &mut ChatConnectionManager, events: &mut mpsc::UnboundedReceiver<TaggedEvent>) {
        while let Ok(tagged) = events.try_recv() {
            manager.handle_event(tagged);
        }
    }

    #[test]
    fn endpoint_rejects_http_scheme() {
        let error = chat_endpoint("http://chat.test", "1", true).unwrap_err();
        assert!(matches!(error, ChatError::InvalidEndpoint { .. }));
    }

    #[test]
    fn endpoint_encodes_conversation_id() {
        let url = chat_endpoint("wss://chat.test/api", "a b&c", true).unwrap();
        assert_eq!(url.path(), "/api/chat");
        assert_eq!(url.query(), Some("convo_id=a+b%26c"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_events_from_replaced_transport_are_ignored() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();

        manager.connect("1").unwrap();
        manager.connect("2").unwrap();
        let first = connector.peer(0).unwrap();
        let second = connector.peer(1).unwrap();
        assert!(first.close_requested());

        first.open();
        first.message(r#"{"content":"old","sender_id":"1"}"#);
        first.close(None);
        pump(&mut manager, &mut events);

        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(manager.messages().is_empty());
        assert!(manager.reconnect_deadline().is_none());

        second.open();
        pump(&mut manager, &mut events);
        assert!(manager.is_connected());
        assert_eq!(manager.conversation_id(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_close_from_same_transport_schedules_once() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();

        manager.connect("1").unwrap();
        let peer = connector.last().unwrap();
        peer.open();
        peer.close(None);
        pump(&mut manager, &mut events);
        let deadline = manager.reconnect_deadline().unwrap();

        tokio::time::advance(Duration::from_millis(300)).await;
        peer.close(None);
        pump(&mut manager, &mut events);

        assert_eq!(manager.reconnect_deadline(), Some(deadline));
        assert_eq!(manager.reconnect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn callback_sees_each_message_once() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.on_message(move |message| sink.lock().unwrap().push(message.content.clone()));

        manager.connect("1").unwrap();
        let peer = connector.last().unwrap();
        peer.open();
        peer.message(r#"{"content":"one","sender_id":"2"}"#);
        peer.message("{broken");
        peer.message(r#"{"content":"two","sender_id":"2","role":"agent","sender_name":"Rae"}"#);
        pump(&mut manager, &mut events);

        assert_eq!(*seen.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(manager.messages()[1].role, Some(Role::Agent));
        assert_eq!(manager.messages()[1].sender_name.as_deref(), Some("Rae"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_timestamp_uses_receipt_time() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();

        manager.connect("1").unwrap();
        let peer = connector.last().unwrap();
        peer.open();
        peer.message(r#"{"content":"now","sender_id":"2","timestamp":"not a date"}"#);
        pump(&mut manager, &mut events);

        let message = &manager.messages()[0];
        assert!((Utc::now() - message.sent_at).num_seconds().abs() < 5);
        assert!(!message.timestamp.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn odd_timestamp_types_keep_the_frame() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();

        manager.connect("1").unwrap();
        let peer = connector.last().unwrap();
        peer.open();
        peer.message(r#"{"content":"a","sender_id":"2","timestamp":true}"#);
        peer.message(r#"{"content":"b","sender_id":"2","timestamp":{"$date":1704067200000}}"#);
        peer.message(r#"{"content":"c","sender_id":"2","timestamp":[]}"#);
        pump(&mut manager, &mut events);

        let contents: Vec<_> = manager.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"]);
        for message in manager.messages() {
            assert!((Utc::now() - message.sent_at).num_seconds().abs() < 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_that_cannot_open_stops_reconnecting() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);
        let mut events = manager.take_event_stream().unwrap();

        manager.connect("1").unwrap();
        let peer = connector.last().unwrap();
        peer.open();
        peer.close(None);
        pump(&mut manager, &mut events);
        assert_eq!(manager.state(), ConnectionState::Closed { reconnecting: true });

        manager.options.base_url = "http://chat.test".to_string();
        tokio::time::advance(Duration::from_millis(1000)).await;

        assert!(!manager.poll_reconnect());
        assert_eq!(manager.state(), ConnectionState::Closed { reconnecting: false });
        assert!(manager.reconnect_deadline().is_none());
        assert_eq!(connector.opened(), 1);
    }

    #[test]
    fn connect_after_dispose_is_rejected() {
        let connector = MockConnector::new();
        let mut manager = manager(&connector);

        manager.close();
        assert!(matches!(manager.connect("1"), Err(ChatError::Disposed)));
        assert_eq!(connector.opened(), 0);
        assert_eq!(manager.state(), ConnectionState::Disposed);
    }

    #[test]
    fn invalid_base_url_leaves_manager_idle() {
        let connector = MockConnector::new();
        let mut manager = ChatConnectionManager::new(
            Arc::new(connector.clone()),
            customer(),
            ManagerOptions::new("not a url"),
        );

        assert!(manager.connect("1").is_err());
        assert_eq!(manager.state(), ConnectionState::Idle);
        assert_eq!(connector.opened(), 0);
    }
}
