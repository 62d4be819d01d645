//! Tool: execute_command — run a one-shot shell command in the workspace.
//! The agent loop wraps every tool call (this one included) in the
//! spec's tool timeout, so the tool itself doesn't need its own deadline.

use async_trait::async_trait;
use tokio::process::Command;

use super::{Tool, ToolContext, ToolResult};

pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace directory via `sh -c` and return its stdout/stderr."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, input: serde_json::Value) -> ToolResult {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: command");
        };

        let output = Command::new("sh").arg("-c").arg(command).current_dir(&ctx.workspace).output().await;

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout);
                let stderr = String::from_utf8_lossy(&out.stderr);
                let mut text = String::new();
                if !stdout.is_empty() {
                    text.push_str(&stdout);
                }
                if !stderr.is_empty() {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str("[stderr]\n");
                    text.push_str(&stderr);
                }
                let code = out.status.code().unwrap_or(-1);
                if code != 0 {
                    text.push_str(&format!("\n[exit code: {code}]"));
                }
                if text.is_empty() {
                    text = "(no output)".to_string();
                }
                if code == 0 {
                    ToolResult::success(text)
                } else {
                    ToolResult { content: text, is_error: true }
                }
            }
            Err(e) => ToolResult::error(format!("failed to spawn command: {e}")),
        }
    }
}
