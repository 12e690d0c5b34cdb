//! Wall-clock deadline for any tool.

use std::time::Duration;

use agentloop_core::error::ToolError;
use agentloop_core::tool::{Tool, ToolResult};
use async_trait::async_trait;
use tracing::warn;

/// Wraps a tool so that `execute` fails with [`ToolError::Timeout`] once
/// `timeout` elapses. The inner future is dropped on expiry.
pub struct DeadlineTool<T> {
    inner: T,
    timeout: Duration,
}

impl<T: Tool> DeadlineTool<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: Tool> Tool for DeadlineTool<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        match tokio::time::timeout(self.timeout, self.inner.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %self.inner.name(), timeout_ms = self.timeout.as_millis() as u64, "Tool deadline exceeded");
                Err(ToolError::Timeout {
                    tool_name: self.inner.name().to_string(),
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}
