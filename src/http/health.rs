use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::CoreContext;

/// GET /health — liveness probe plus provider health, mirroring the
/// teacher's gateway endpoint of the same name.
pub async fn health_handler(State(state): State<Arc<CoreContext>>) -> Json<Value> {
    let budget = state.ledger.get_budget_status().ok();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "progress_subscribers": state.progress_subscribers.len(),
        "budget": budget,
    }))
}
