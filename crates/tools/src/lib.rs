//! Built-in tool implementations for agentloop.
//!
//! - [`planning`]: the planning ledger and the `planning` tool
//! - [`terminate`]: ends the interaction
//! - [`python_execute`]: runs code in a child interpreter
//! - [`deadline`]: wall-clock limit for any tool

pub mod deadline;
pub mod planning;
pub mod python_execute;
pub mod terminate;

use std::time::Duration;

use agentloop_core::agent::AgentConfig;
use agentloop_core::tool::ToolRegistry;

pub use deadline::DeadlineTool;
pub use planning::{Plan, PlanningCommand, PlanningLedger, PlanningTool, StepStatus};
pub use python_execute::PythonExecuteTool;
pub use terminate::{TERMINATE_TOOL_NAME, TerminateTool};

/// Create the default tool registry.
///
/// Code execution is bounded by `tool_timeout_secs`.
pub fn default_registry(config: &AgentConfig) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(PlanningTool::new()));
    registry.register(Box::new(DeadlineTool::new(
        PythonExecuteTool::new(),
        Duration::from_secs(config.tool_timeout_secs),
    )));
    registry.register(Box::new(TerminateTool));
    registry
}
