//! WebSocket transport: one task per socket, JSON text frames in, a
//! queued writer out.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use tabhub_core::limits::MAX_MESSAGE_SIZE;
use tabhub_core::{ClientMessage, ServerMessage};

use crate::api::AppState;
use crate::hub::{ConnState, Hub};
use crate::limiter::SlidingWindow;
use crate::registry::Outbound;

/// Upgrade `GET /` into the sync protocol.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<Hub>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(64);
    let mut conn = ConnState {
        handle: hub.connections.new_handle(tx),
        browser_id: None,
    };
    let mut limiter = SlidingWindow::default();

    loop {
        tokio::select! {
            outbound = rx.recv() => match outbound {
                Some(Outbound::Message(msg)) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "dropping unserializable message");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else {
                    break;
                };
                let raw = match frame {
                    Message::Text(raw) => raw,
                    // Some clients send JSON as binary frames.
                    Message::Binary(bytes) => match String::from_utf8(bytes) {
                        Ok(raw) => raw,
                        Err(_) => continue,
                    },
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                if limiter.is_limited() {
                    conn.handle.push(ServerMessage::Error {
                        message: "Rate limited".to_string(),
                    });
                    continue;
                }
                let msg = match serde_json::from_str::<ClientMessage>(&raw) {
                    Ok(msg) => msg,
                    Err(e) => {
                        trace!(error = %e, "ignoring unparseable frame");
                        continue;
                    }
                };
                hub.dispatch(&mut conn, msg).await;
            }
        }
    }

    hub.handle_disconnect(&conn).await;
}
