//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world. The
//! [`ToolRegistry`] is the failure-containment boundary: application-level
//! tool errors come back as data in [`ToolResult::error`], and only
//! [`ToolError::Defect`] escapes to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use crate::error::ToolError;
use crate::message::ToolCall;
use crate::provider::ToolDefinition;

/// The result of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Success payload (usually a string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Application-level failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Out-of-band note for the agent runtime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when no channel is populated.
    pub fn is_empty(&self) -> bool {
        self.output.is_none() && self.error.is_none() && self.system.is_none()
    }

    /// The output rendered as text; strings are returned without quotes.
    pub fn output_text(&self) -> Option<String> {
        self.output.as_ref().map(|value| match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Merge two results field by field.
    ///
    /// Text fields are concatenated. Structured outputs cannot be merged and
    /// fail with [`ToolError::Unmergeable`] when both sides are populated.
    pub fn combine(self, other: ToolResult) -> Result<ToolResult, ToolError> {
        use serde_json::Value;

        let output = match (self.output, other.output) {
            (Some(Value::String(a)), Some(Value::String(b))) => Some(Value::String(a + &b)),
            (Some(_), Some(_)) => return Err(ToolError::Unmergeable { field: "output" }),
            (a, b) => a.or(b),
        };

        Ok(ToolResult {
            output,
            error: concat_text(self.error, other.error),
            system: concat_text(self.system, other.system),
        })
    }
}

fn concat_text(a: Option<String>, b: Option<String>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + &b),
        (a, b) => a.or(b),
    }
}

impl std::fmt::Display for ToolResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "Error: {error}");
        }
        match self.output_text() {
            Some(text) => f.write_str(&text),
            None => Ok(()),
        }
    }
}

impl From<String> for ToolResult {
    fn from(output: String) -> Self {
        Self::success(output)
    }
}

impl From<&str> for ToolResult {
    fn from(output: &str) -> Self {
        Self::success(output)
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait. Tools are registered in the
/// ToolRegistry and made available to the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "planning", "terminate").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given named arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// An ordered, named set of tools.
///
/// The agent uses this to:
/// 1. Advertise tool schemas to the model
/// 2. Dispatch the model's tool calls by name
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a registry from a batch of tools. Later duplicates win.
    pub fn with_tools(tools: impl IntoIterator<Item = Box<dyn Tool>>) -> Self {
        let mut registry = Self::new();
        for tool in tools {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name in place.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => {
                debug!(tool = %name, "Replacing registered tool");
                self.tools[slot] = tool;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.index.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Descriptors for every tool, in registration order.
    pub fn schema(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool by name.
    ///
    /// An unknown name or an application-level tool error yields a
    /// `ToolResult` with `error` set. Only defects return `Err`.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolResult, ToolError> {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "Tool not registered");
            return Ok(ToolResult::failure(format!("Tool {name} is invalid")));
        };

        match tool.execute(arguments).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_defect() => Err(e),
            Err(e) => {
                warn!(tool = %name, error = %e, "Tool returned an error");
                Ok(ToolResult::failure(e.to_string()))
            }
        }
    }

    /// Execute a model-issued tool call, decoding its JSON arguments first.
    pub async fn invoke_call(&self, call: &ToolCall) -> std::result::Result<ToolResult, ToolError> {
        let raw = call.function.arguments.trim();
        let arguments = if raw.is_empty() {
            serde_json::json!({})
        } else {
            match serde_json::from_str(raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!(tool = %call.name(), error = %e, "Invalid tool call arguments");
                    return Ok(ToolResult::failure(format!(
                        "Failed to parse arguments for {}: {e}",
                        call.name()
                    )));
                }
            }
        };
        self.invoke(call.name(), arguments).await
    }

    /// Run every tool once with empty arguments, in registration order.
    ///
    /// Failures of any kind are recorded per tool and never stop the sweep.
    pub async fn invoke_all(&self) -> Vec<(String, ToolResult)> {
        let mut results = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            let result = match tool.execute(serde_json::json!({})).await {
                Ok(result) => result,
                Err(e) => ToolResult::failure(e.to_string()),
            };
            results.push((tool.name().to_string(), result));
        }
        results
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
