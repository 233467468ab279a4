//! `WsConnector` against a real tokio-tungstenite server on localhost.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use waterchat_chat::{
    ChatClient, ChatConnectionManager, ConnectionState, FixedDelay, ManagerOptions, Role,
    SessionUser, WsConnector,
};

const WAIT: Duration = Duration::from_secs(5);

fn agent() -> SessionUser {
    SessionUser {
        uid: "7".to_string(),
        area_id: None,
        firstname: Some("Noor".to_string()),
        lastname: Some("Haddad".to_string()),
        name: None,
        role: Role::Agent,
    }
}

fn client_for(addr: SocketAddr, retry: FixedDelay) -> ChatClient {
    let manager = ChatConnectionManager::new(
        Arc::new(WsConnector::new(Duration::from_secs(2))),
        agent(),
        ManagerOptions::new(format!("ws://{addr}")).with_retry(retry),
    );
    ChatClient::spawn(manager).expect("client spawns")
}

/// Accepts connections forever. The first one sends a greeting, forwards the
/// first text frame it receives, closes with "going away" and reports whether
/// the client answered the close handshake; later ones greet and report when
/// the client closes them.
async fn serve(
    listener: TcpListener,
    paths: mpsc::UnboundedSender<String>,
    frames: mpsc::UnboundedSender<String>,
) {
    let mut index = 0u32;
    while let Ok((stream, _)) = listener.accept().await {
        index += 1;
        let paths = paths.clone();
        let frames = frames.clone();

        tokio::spawn(async move {
            let record_path = move |request: &Request, response: Response| {
                let _ = paths.send(request.uri().to_string());
                Ok::<Response, ErrorResponse>(response)
            };
            let Ok(mut socket) = accept_hdr_async(stream, record_path).await else {
                return;
            };

            let greeting = json!({
                "content": format!("welcome {index}"),
                "sender_id": 1,
                "sender_name": "Desk",
                "role": "admin",
                "timestamp": "2024-01-01T00:00:00Z",
            });
            if socket.send(Message::Text(greeting.to_string())).await.is_err() {
                return;
            }

            if index == 1 {
                while let Some(Ok(message)) = socket.next().await {
                    if let Message::Text(text) = message {
                        let _ = frames.send(text);
                        break;
                    }
                }
                let _ = socket
                    .close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: "restarting".into(),
                    }))
                    .await;

                let mut acknowledged = false;
                while let Some(message) = socket.next().await {
                    match message {
                        Ok(Message::Close(_)) => acknowledged = true,
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
                let outcome = if acknowledged { "close acknowledged" } else { "close dropped" };
                let _ = frames.send(outcome.to_string());
            } else {
                while let Some(message) = socket.next().await {
                    if matches!(message, Ok(Message::Close(_)) | Err(_)) {
                        break;
                    }
                }
                let _ = frames.send("closed".to_string());
            }
        });
    }
}

#[tokio::test]
async fn websocket_round_trip_with_server_initiated_close() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (paths_tx, mut paths) = mpsc::unbounded_channel();
    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    tokio::spawn(serve(listener, paths_tx, frames_tx));

    let client = client_for(addr, FixedDelay::new(Duration::from_millis(50)));
    let mut inbound = client.subscribe();
    client.connect("room-1");

    assert_eq!(
        timeout(WAIT, paths.recv()).await?.as_deref(),
        Some("/chat?convo_id=room-1")
    );

    let greeting = timeout(WAIT, inbound.recv()).await??;
    assert_eq!(greeting.content, "welcome 1");
    assert_eq!(greeting.sender_id, "1");
    assert_eq!(greeting.role, Some(Role::Admin));
    assert!(client.is_connected());

    client.send(" hello desk ", None);
    let sent = timeout(WAIT, frames.recv()).await?.expect("server saw a frame");
    let sent: Value = serde_json::from_str(&sent)?;
    assert_eq!(sent["content"], "hello desk");
    assert_eq!(sent["sender_id"], "7");
    assert_eq!(sent["sender_name"], "Noor Haddad");
    assert_eq!(sent["role"], "agent");

    // The server goes away; the client completes the close handshake and comes
    // back on the same conversation.
    assert_eq!(
        timeout(WAIT, frames.recv()).await?.as_deref(),
        Some("close acknowledged")
    );
    assert_eq!(
        timeout(WAIT, paths.recv()).await?.as_deref(),
        Some("/chat?convo_id=room-1")
    );
    let second = timeout(WAIT, inbound.recv()).await??;
    assert_eq!(second.content, "welcome 2");
    assert_eq!(client.messages().await.len(), 2);

    client.close();
    assert_eq!(
        timeout(WAIT, frames.recv()).await?.as_deref(),
        Some("closed")
    );
    timeout(WAIT, client.join()).await?;
    Ok(())
}

#[tokio::test]
async fn refused_connection_is_retried_until_policy_gives_up() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = client_for(
        addr,
        FixedDelay::new(Duration::from_millis(20)).with_max_attempts(1),
    );
    client.connect("nobody-home");

    let state = timeout(
        WAIT,
        client.wait_for_state(|state| *state == ConnectionState::Closed { reconnecting: false }),
    )
    .await?;
    assert_eq!(state, Some(ConnectionState::Closed { reconnecting: false }));
    assert!(!client.is_connected());

    client.close();
    timeout(WAIT, client.join()).await?;
    Ok(())
}
