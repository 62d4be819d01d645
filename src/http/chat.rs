//! POST /chat — spec.md §6's `processMessage`, over HTTP for clients that
//! don't need the progress stream. Shape follows the teacher's
//! `skynet_gateway::http::chat::chat_handler`: look up or create a session,
//! run the agent loop, return the final text.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::CoreContext;
use crate::error::Result;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    /// Defaults to `"http"` — distinguishes sessions created over this
    /// endpoint from ones a future channel adapter creates under its own
    /// channel id.
    #[serde(default = "default_channel")]
    pub channel_id: String,
    pub message: String,
}

fn default_channel() -> String {
    "http".to_string()
}

#[derive(Serialize)]
pub struct ChatReply {
    pub session_id: String,
    pub reply: String,
}

pub async fn chat_handler(State(state): State<Arc<CoreContext>>, Json(req): Json<ChatRequest>) -> Result<Json<ChatReply>> {
    let session = state.get_or_create_session(&req.user_id, &req.channel_id)?;
    let reply = state.process_message(&session.id, &req.user_id, &req.message).await?;
    Ok(Json(ChatReply { session_id: session.id, reply }))
}
