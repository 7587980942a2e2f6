#![allow(dead_code)]

use futures::StreamExt;
use spawnd::api;
use spawnd::manager::{
    EventFeed, EventSubscription, ManagerConfig, SessionEvent, SessionManager, SpawnRequest,
};
use spawnd::session::{SessionId, SessionStatus};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A manager with default settings.
pub fn create_manager() -> SessionManager {
    SessionManager::new(ManagerConfig::default())
}

/// Spawn `/bin/sh -c <script>` in the temp dir under `project`.
pub fn spawn_sh(manager: &SessionManager, project: &str, script: &str) -> SessionId {
    manager
        .spawn(SpawnRequest::new(
            project,
            std::env::temp_dir(),
            "/bin/sh",
            vec!["-c".to_string(), script.to_string()],
        ))
        .expect("failed to spawn test session")
}

/// Poll until the session reports `Stopped`, returning its scrollback.
pub async fn wait_for_stopped(manager: &SessionManager, id: &SessionId) -> Vec<u8> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let (status, scrollback) = manager.status(id).expect("session vanished");
        if status == SessionStatus::Stopped {
            return scrollback;
        }
        assert!(Instant::now() < deadline, "session {id} never stopped");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll until the session's scrollback contains `needle`.
pub async fn wait_for_scrollback(manager: &SessionManager, id: &SessionId, needle: &str) -> Vec<u8> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let scrollback = manager.scrollback(id).expect("session vanished");
        if String::from_utf8_lossy(&scrollback).contains(needle) {
            return scrollback;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {needle:?}, got {:?}",
            String::from_utf8_lossy(&scrollback)
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Next event matching `pred`, or panic after [`TIMEOUT`]. Resync
/// snapshots are skipped.
pub async fn next_event(
    rx: &mut EventSubscription,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            match rx.recv().await {
                Some(EventFeed::Event(event)) if pred(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timeout waiting for event")
}

/// Drain queued events without waiting.
pub fn drain_events(rx: &mut EventSubscription) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Some(feed) = rx.try_recv() {
        if let EventFeed::Event(event) = feed {
            events.push(event);
        }
    }
    events
}

/// Serve the API router on an ephemeral loopback port.
pub async fn start_server(state: api::AppState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

/// Receive the next text frame and parse it as JSON.
pub async fn recv_json(ws: &mut futures::stream::SplitStream<WsStream>) -> serde_json::Value {
    let msg = tokio::time::timeout(TIMEOUT, ws.next())
        .await
        .expect("timeout waiting for message")
        .expect("stream ended")
        .expect("ws error");
    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("invalid JSON"),
        other => panic!("expected text message, got {:?}", other),
    }
}
