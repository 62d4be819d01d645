use serde::{Deserialize, Serialize};

/// Tagged progress update emitted during `process_message`. Fire-and-forget —
/// the loop never awaits a slow consumer (spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    ToolStart { tool: String, call_id: String },
    ToolComplete { tool: String, call_id: String, is_error: bool },
    ToolError { tool: String, call_id: String, message: String },
    Thinking,
    Planning,
    Memory { action: String, count: usize, items: Option<Vec<String>> },
    Status { message: String },
}

pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressEvent>;

/// Sends a progress event without blocking; silently drops it if the
/// receiver has gone away (the caller stopped listening).
pub fn emit(tx: Option<&ProgressSender>, event: ProgressEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(event);
    }
}
