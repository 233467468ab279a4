//! In-memory connector for driving the manager without a network.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use url::Url;

use super::{Connector, OutboundFrame, TransportEvent, TransportEventSink, TransportLink};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records every transport it opens and hands back a [`MockPeer`] for each.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    peers: Arc<Mutex<Vec<MockPeer>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transports opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.peers).len()
    }

    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        lock(&self.peers).get(index).cloned()
    }

    pub fn last(&self) -> Option<MockPeer> {
        lock(&self.peers).last().cloned()
    }

    pub fn endpoints(&self) -> Vec<Url> {
        lock(&self.peers)
            .iter()
            .map(|peer| peer.endpoint.clone())
            .collect()
    }
}

impl Connector for MockConnector {
    fn open(&self, endpoint: &Url, events: TransportEventSink) -> TransportLink {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            endpoint: endpoint.clone(),
            events,
            inbox: Arc::new(Mutex::new(PeerInbox {
                frames: frames_rx,
                seen: Vec::new(),
            })),
        };
        lock(&self.peers).push(peer);
        TransportLink::new(frames_tx)
    }
}

#[derive(Debug)]
struct PeerInbox {
    frames: mpsc::UnboundedReceiver<OutboundFrame>,
    seen: Vec<OutboundFrame>,
}

impl PeerInbox {
    fn drain(&mut self) -> &[OutboundFrame] {
        while let Ok(frame) = self.frames.try_recv() {
            self.seen.push(frame);
        }
        &self.seen
    }
}

/// Remote end of a mock transport: raises events, observes writes.
#[derive(Debug, Clone)]
pub struct MockPeer {
    endpoint: Url,
    events: TransportEventSink,
    inbox: Arc<Mutex<PeerInbox>>,
}

impl MockPeer {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn generation(&self) -> u64 {
        self.events.generation()
    }

    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.emit(event)
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Open)
    }

    pub fn message(&self, frame: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(frame.into()))
    }

    pub fn error(&self, detail: impl Into<String>) -> bool {
        self.emit(TransportEvent::Error(detail.into()))
    }

    pub fn close(&self, code: Option<u16>) -> bool {
        self.emit(TransportEvent::closed(code, "closed by peer"))
    }

    /// Text frames the manager wrote to this transport, oldest first.
    pub fn written(&self) -> Vec<String> {
        lock(&self.inbox)
            .drain()
            .iter()
            .filter_map(|frame| match frame {
                OutboundFrame::Text(text) => Some(text.clone()),
                OutboundFrame::Close => None,
            })
            .collect()
    }

    pub fn close_requested(&self) -> bool {
        lock(&self.inbox).drain().contains(&OutboundFrame::Close)
    }
}
