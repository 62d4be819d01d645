//! Tool: recall — retrieve the full text of a tool output the Context
//! Builder truncated (spec.md §4.7's "…truncated, use recall(hash)…" marker).

use async_trait::async_trait;

use crate::context::RecallCache;

use super::{Tool, ToolContext, ToolResult};

pub struct RecallTool {
    cache: RecallCache,
}

impl RecallTool {
    pub fn new(cache: RecallCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Retrieve the full text of a previously truncated tool output by its recall hash."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "hash": { "type": "string", "description": "The recall hash from a truncated tool output." }
            },
            "required": ["hash"]
        })
    }

    fn is_pure(&self) -> bool {
        true
    }

    async fn execute(&self, _ctx: &ToolContext, input: serde_json::Value) -> ToolResult {
        let Some(hash) = input.get("hash").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: hash");
        };
        match self.cache.get(hash) {
            Some(text) => ToolResult::success(text.clone()),
            None => ToolResult::error(format!("no cached output for hash '{hash}'")),
        }
    }
}
