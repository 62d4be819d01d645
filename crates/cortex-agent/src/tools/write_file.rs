//! Tool: write_file — write content to a file on disk, creating parent
//! directories as needed.

use async_trait::async_trait;

use super::read_file::resolve;
use super::{Tool, ToolContext, ToolResult};

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, overwriting it if it exists. Creates parent directories as needed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Absolute or relative path to the file." },
                "content": { "type": "string", "description": "Content to write." }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };
        let resolved = resolve(&ctx.workspace, path);

        if let Some(parent) = resolved.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::error(format!("failed to create parent directories for '{path}': {e}"));
            }
        }

        match std::fs::write(&resolved, content) {
            Ok(()) => ToolResult::success(format!("wrote {} bytes to {path}", content.len())),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }
}
