//! POST /sessions and DELETE /sessions/{id} — spec.md §6's
//! `getOrCreateSession`/`deleteSession`. GET /sessions/{id}/notifications
//! mirrors the teacher's `skynet_gateway::http::notifications` polling
//! endpoint, draining scheduler-fired nudges queued for a user.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::app::CoreContext;
use crate::error::Result;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub user_id: String,
    #[serde(default = "default_channel")]
    pub channel_id: String,
}

fn default_channel() -> String {
    "http".to_string()
}

#[derive(Serialize)]
pub struct SessionReply {
    pub session_id: String,
    pub user_id: String,
    pub channel_id: String,
}

pub async fn create_session_handler(State(state): State<Arc<CoreContext>>, Json(req): Json<CreateSessionRequest>) -> Result<Json<SessionReply>> {
    let session = state.get_or_create_session(&req.user_id, &req.channel_id)?;
    Ok(Json(SessionReply { session_id: session.id, user_id: session.user_id, channel_id: session.channel_id }))
}

pub async fn delete_session_handler(State(state): State<Arc<CoreContext>>, Path(id): Path<String>) -> Result<Json<serde_json::Value>> {
    state.delete_session(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Serialize)]
pub struct NotificationReply {
    pub notifications: Vec<String>,
}

/// `{id}` here is a user id, not a session id — fired nudges are queued per
/// user (see `app::run_notification_drain`) since a scheduled item has no
/// session of its own until something decides where to deliver it.
pub async fn notifications_handler(State(state): State<Arc<CoreContext>>, Path(id): Path<String>) -> Json<NotificationReply> {
    let notifications = state.notifications.remove(&id).map(|(_, v)| v).unwrap_or_default();
    Json(NotificationReply { notifications })
}
