use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_args, Emitter, Tool, ToolContext, ToolResult};

/// Hands control back to the user with a final message
pub struct RespondTool;

#[derive(Deserialize)]
struct RespondArgs {
    message: String,
    #[serde(default = "default_success")]
    success: bool,
}

fn default_success() -> bool {
    true
}

#[async_trait]
impl Tool for RespondTool {
    fn name(&self) -> &str {
        "respond"
    }

    fn description(&self) -> &str {
        "Yield control back to the user with a response message.\n\
         Use this when you have completed the user's instruction and are ready for the next one."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {"type": "string", "description": "The message to send to the user"},
                "success": {"type": "boolean", "description": "Whether the instruction was completed (default: true)"}
            },
            "required": ["message"]
        })
    }

    async fn run(&self, args: Value, _ctx: &ToolContext, out: &Emitter) -> ToolResult {
        let args: RespondArgs = parse_args(self.name(), args)?;
        let status = if args.success { "✓" } else { "⚠" };
        out.success(format!("{} {}", status, args.message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::adapter::invoke;

    #[tokio::test]
    async fn test_respond_marks_status() {
        let ctx = ToolContext::new(std::env::temp_dir());
        assert_eq!(invoke(&RespondTool, json!({"message": "done"}), &ctx).await, "✓ done");
        assert_eq!(
            invoke(&RespondTool, json!({"message": "partial", "success": false}), &ctx).await,
            "⚠ partial"
        );
    }
}
