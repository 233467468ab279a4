//! Transport seam between the connection manager and a duplex socket.
//!
//! A [`Connector`] opens a transport and returns a [`TransportLink`] right
//! away; the outcome of the open, inbound frames, errors and the final close
//! arrive later as [`TransportEvent`]s through the [`TransportEventSink`].
//! Every sink is tagged with the generation of the handle it belongs to so
//! the manager can discard events from transports it already replaced.

pub mod mock;
pub mod websocket;

use tokio::sync::mpsc;
use url::Url;

use crate::types::{ChatError, ChatResult};

pub use mock::{MockConnector, MockPeer};
pub use websocket::WsConnector;

/// Close code for a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Signals raised by a transport, in the order the socket produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Error(String),
    /// `code` is `None` when the socket dropped without a close frame.
    Close { code: Option<u16>, reason: String },
}

impl TransportEvent {
    pub fn closed(code: Option<u16>, reason: impl Into<String>) -> Self {
        TransportEvent::Close {
            code,
            reason: reason.into(),
        }
    }
}

/// A transport event tagged with the handle generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Write half handed to a transport for reporting its events.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent>,
}

impl TransportEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the manager has gone away.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Frames the manager asks a transport to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// The manager's exclusive handle on a live transport.
#[derive(Debug)]
pub struct TransportLink {
    frames: mpsc::UnboundedSender<OutboundFrame>,
}

impl TransportLink {
    pub fn new(frames: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self { frames }
    }

    pub fn send_text(&self, frame: String) -> ChatResult<()> {
        self.frames
            .send(OutboundFrame::Text(frame))
            .map_err(|_| ChatError::TransportClosed)
    }

    pub fn close(&self) {
        let _ = self.frames.send(OutboundFrame::Close);
    }
}

/// Opens transports to a chat endpoint.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, endpoint: &Url, events: TransportEventSink) -> TransportLink;
}
