//! WebSocket endpoints: the output/input bridge and the lifecycle event feed.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};

use super::AppState;
use crate::manager::EventFeed;
use crate::protocol::WsMessage;

pub(super) async fn ws_bridge(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws_bridge(socket, state))
}

async fn handle_ws_bridge(socket: WebSocket, state: AppState) {
    let (_guard, mut shutdown_rx) = state.shutdown.register();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut output = state.manager.subscribe();

    if *shutdown_rx.borrow() {
        send_close(&mut ws_tx).await;
        return;
    }
    tracing::debug!("bridge client connected");

    loop {
        tokio::select! {
            // Session output -> WebSocket
            chunk = output.recv() => {
                let Some(chunk) = chunk else { break };
                let text = match WsMessage::from(chunk).encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode output frame");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            // WebSocket -> session input
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_client_frame(&state, text.as_str()).await;
                        if let Some(reply) = reply {
                            if ws_tx.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "bridge socket error");
                        break;
                    }
                }
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::debug!("bridge received shutdown signal, closing");
                    send_close(&mut ws_tx).await;
                    break;
                }
            }
        }
    }
    tracing::debug!("bridge client disconnected");
}

/// Act on one inbound text frame. Returns a frame to send back, if any.
async fn handle_client_frame(state: &AppState, text: &str) -> Option<String> {
    let msg = match WsMessage::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::warn!(error = %e, "dropping undecodable frame");
            return None;
        }
    };
    match msg {
        WsMessage::Input { session_id, data } => {
            let manager = state.manager.clone();
            let id = session_id.clone();
            let result = tokio::task::spawn_blocking(move || manager.write(&id, &data)).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(session_id = %session_id, error = %e, "input rejected"),
                Err(e) => tracing::error!(session_id = %session_id, error = %e, "input task failed"),
            }
            None
        }
        WsMessage::Heartbeat => WsMessage::Heartbeat.encode().ok(),
        WsMessage::Output { session_id, .. } => {
            tracing::debug!(session_id = %session_id, "ignoring output frame from client");
            None
        }
    }
}

pub(super) async fn ws_events(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws_events(socket, state))
}

async fn handle_ws_events(socket: WebSocket, state: AppState) {
    let (_guard, mut shutdown_rx) = state.shutdown.register();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.manager.subscribe_events();

    if *shutdown_rx.borrow() {
        send_close(&mut ws_tx).await;
        return;
    }

    loop {
        tokio::select! {
            feed = events.recv() => {
                let Some(feed) = feed else { break };
                let json = match encode_feed(&feed) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode event");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                }
            }

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    send_close(&mut ws_tx).await;
                    break;
                }
            }
        }
    }
}

/// Events go out as-is; a resync becomes `{"type":"resync","sessions":[..]}`.
fn encode_feed(feed: &EventFeed) -> Result<String, serde_json::Error> {
    match feed {
        EventFeed::Event(event) => serde_json::to_string(event),
        EventFeed::Resync(sessions) => serde_json::to_string(&serde_json::json!({
            "type": "resync",
            "sessions": sessions,
        })),
    }
}

async fn send_close<S>(ws_tx: &mut S)
where
    S: Sink<Message> + Unpin,
{
    let close_frame = CloseFrame {
        code: axum::extract::ws::close_code::NORMAL,
        reason: "server shutting down".into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
    let _ = ws_tx.flush().await;
}
