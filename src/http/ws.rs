//! GET /ws/{session_id} — spec.md §6's progress-event-stream surface.
//! Simpler than the teacher's `skynet_gateway::ws` connection handler (no
//! challenge/nonce handshake — auth is out of scope here): each inbound
//! text frame is one `processMessage` turn; `ProgressEvent`s fire while the
//! turn runs, followed by the final reply.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::app::CoreContext;

pub async fn ws_handler(ws: WebSocketUpgrade, Path(session_id): Path<String>, State(state): State<Arc<CoreContext>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, session_id, state))
}

async fn handle_connection(socket: WebSocket, session_id: String, state: Arc<CoreContext>) {
    info!(session_id, "WS connection opened");
    let (mut tx, mut rx) = socket.split();

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    state.progress_subscribers.insert(session_id.clone(), progress_tx);

    loop {
        tokio::select! {
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let text_ref: &str = &text;
                        let user_id = session_id.clone();
                        match state.process_message(&session_id, &user_id, text_ref).await {
                            Ok(reply) => {
                                let payload = json!({ "type": "reply", "text": reply });
                                if tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(session_id, error = %e, "process_message failed over WS");
                                let payload = json!({ "type": "error", "message": e.to_string() });
                                if tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            event = progress_rx.recv() => {
                let Some(event) = event else { break };
                let payload = serde_json::to_value(&event).unwrap_or(json!({ "type": "progress" }));
                if tx.send(Message::Text(payload.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.progress_subscribers.remove(&session_id);
    info!(session_id, "WS connection closed");
}
