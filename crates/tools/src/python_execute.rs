//! Code execution tool: runs a Python snippet in a child interpreter.
//!
//! Only what the snippet prints is visible. The child is spawned with
//! `kill_on_drop`, so wrapping the tool in a [`DeadlineTool`] terminates the
//! process when the deadline passes.
//!
//! [`DeadlineTool`]: crate::deadline::DeadlineTool

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolResult};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct PythonExecuteTool {
    interpreter: String,
    /// Arguments placed before the code, `-c` for Python
    args: Vec<String>,
}

impl Default for PythonExecuteTool {
    fn default() -> Self {
        Self::new()
    }
}

impl PythonExecuteTool {
    pub fn new() -> Self {
        Self {
            interpreter: "python3".into(),
            args: vec!["-c".into()],
        }
    }

    /// Use a different interpreter, e.g. a virtualenv's `python`.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>, args: Vec<String>) -> Self {
        self.interpreter = interpreter.into();
        self.args = args;
        self
    }

    async fn run(&self, code: &str) -> Result<std::process::Output, ToolError> {
        let child = Command::new(&self.interpreter)
            .args(&self.args)
            .arg(code)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python_execute".into(),
                reason: format!("Failed to start {}: {e}", self.interpreter),
            })?;

        child
            .wait_with_output()
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "python_execute".into(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Tool for PythonExecuteTool {
    fn name(&self) -> &str {
        "python_execute"
    }

    fn description(&self) -> &str {
        "Executes Python code string. Note: Only print outputs are visible, function return values are not captured. Use print statements to see results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The Python code to execute."
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let code = arguments["code"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'code' argument".into()))?;

        debug!(interpreter = %self.interpreter, bytes = code.len(), "Executing code");

        let output = self.run(code).await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            return Ok(ToolResult::success(stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);
        warn!(exit_code = code, "Code exited with failure");
        let detail = stderr.trim();
        let result = ToolResult::failure(if detail.is_empty() {
            format!("Process exited with code {code}")
        } else {
            detail.to_string()
        });
        // Anything printed before the failure is still useful to the model
        Ok(if stdout.is_empty() {
            result
        } else {
            ToolResult {
                output: Some(stdout.into()),
                ..result
            }
        })
    }
}
