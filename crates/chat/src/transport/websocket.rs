//! WebSocket transport backed by tokio-tungstenite.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use super::{
    Connector, OutboundFrame, TransportEvent, TransportEventSink, TransportLink, NORMAL_CLOSURE,
};
use crate::types::ChatError;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens one WebSocket per handle, each driven by its own task.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Connector for WsConnector {
    fn open(&self, endpoint: &Url, events: TransportEventSink) -> TransportLink {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_socket(
            endpoint.clone(),
            self.connect_timeout,
            events,
            frames_rx,
        ));
        TransportLink::new(frames_tx)
    }
}

async fn run_socket(
    endpoint: Url,
    connect_timeout: Duration,
    events: TransportEventSink,
    mut frames: mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let generation = events.generation();
    debug!(generation, %endpoint, "opening websocket");

    let socket = tokio::select! {
        result = timeout(connect_timeout, connect_async(endpoint.as_str())) => match result {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(error)) => {
                let error = ChatError::transport_open(error.to_string());
                events.emit(TransportEvent::Error(error.to_string()));
                events.emit(TransportEvent::closed(None, "connection failed"));
                return;
            }
            Err(_) => {
                let error = ChatError::transport_open(format!("timed out after {connect_timeout:?}"));
                events.emit(TransportEvent::Error(error.to_string()));
                events.emit(TransportEvent::closed(None, "connection timed out"));
                return;
            }
        },
        _ = wait_for_close(&mut frames) => {
            debug!(generation, "websocket closed before it opened");
            events.emit(TransportEvent::closed(Some(NORMAL_CLOSURE), "closed before open"));
            return;
        }
    };

    events.emit(TransportEvent::Open);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(error) = sink.send(Message::Text(text)).await {
                        warn!(generation, %error, "failed to write chat frame");
                        events.emit(TransportEvent::Error(error.to_string()));
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    if let Err(error) = sink.close().await {
                        debug!(generation, %error, "websocket close handshake failed");
                    }
                    events.emit(TransportEvent::closed(Some(NORMAL_CLOSURE), "closed by client"));
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    events.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        events.emit(TransportEvent::Message(text));
                    }
                    Err(_) => {
                        events.emit(TransportEvent::Error("binary frame is not valid UTF-8".to_string()));
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (Some(u16::from(frame.code)), frame.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    events.emit(TransportEvent::Close { code, reason });

                    // Send the queued close reply and let the server end the
                    // TCP stream, so the handshake completes on both sides.
                    if let Err(error) = sink.flush().await {
                        debug!(generation, %error, "failed to flush close reply");
                    }
                    let drained = timeout(CLOSE_DRAIN_TIMEOUT, async {
                        while let Some(Ok(_)) = stream.next().await {}
                    })
                    .await;
                    if drained.is_err() {
                        debug!(generation, "server kept the socket open after close");
                    }
                    return;
                }
                // Ping/pong are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    events.emit(TransportEvent::Error(error.to_string()));
                    events.emit(TransportEvent::closed(None, error.to_string()));
                    return;
                }
                None => {
                    events.emit(TransportEvent::closed(None, "connection dropped"));
                    return;
                }
            }
        }
    }
}

/// Resolves once the manager closes or drops the link; writes queued before
/// the socket opened are discarded.
async fn wait_for_close(frames: &mut mpsc::UnboundedReceiver<OutboundFrame>) {
    while let Some(frame) = frames.recv().await {
        if frame == OutboundFrame::Close {
            return;
        }
    }
}
