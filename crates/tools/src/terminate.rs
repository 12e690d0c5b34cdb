//! Terminate tool: lets the model end the interaction.
//!
//! The agent treats this as a special tool; invoking it moves the agent to
//! `FINISHED` once the observation has been recorded.

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolResult};
use async_trait::async_trait;

pub const TERMINATE_TOOL_NAME: &str = "terminate";

pub struct TerminateTool;

#[async_trait]
impl Tool for TerminateTool {
    fn name(&self) -> &str {
        TERMINATE_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Terminate the interaction when the request is met OR if the assistant cannot proceed further with the task. \
When you have finished all the tasks, call this tool to end the work."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "description": "The finish status of the interaction.",
                    "enum": ["success", "failure"]
                }
            },
            "required": ["status"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let status = arguments["status"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'status' argument".into()))?;

        Ok(ToolResult::success(format!(
            "The interaction has been completed with status: {status}"
        )))
    }
}
