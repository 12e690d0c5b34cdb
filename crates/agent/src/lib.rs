//! The agent loop for agentloop.
//!
//! An agent runs in steps. Each step of a [`ToolCallAgent`] is one ReAct
//! cycle:
//!
//! 1. **Think**: send memory and the tool catalog to the model
//! 2. **Act**: execute the tool calls the model chose
//! 3. **Observe**: append each tool's output to memory for the next think
//!
//! The run ends when a special tool (by default `terminate`) completes, or
//! when the step budget is spent.
//!
//! A [`Flow`] groups several agents under string keys and executes input
//! through them, starting from a primary agent.

pub mod base;
pub mod flow;
pub mod react;
pub mod toolcall;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use base::{Agent, AgentCore, STUCK_HINT};
pub use flow::{AgentSet, Flow, PrimaryAgentFlow};
pub use react::{ReAct, THINKING_COMPLETE};
pub use toolcall::ToolCallAgent;
