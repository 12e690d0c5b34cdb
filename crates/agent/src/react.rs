//! ReAct: each step is a think phase followed by an optional act phase.

use agentloop_core::error::Result;
use async_trait::async_trait;

use crate::base::Agent;

pub const THINKING_COMPLETE: &str = "Thinking complete - no action needed";

/// Think/act protocol layered on [`Agent`].
///
/// Implementors usually forward [`Agent::step`] to
/// [`ReAct::think_then_act`].
#[async_trait]
pub trait ReAct: Agent {
    /// Decide what to do next. `false` means there is nothing to act on.
    async fn think(&mut self) -> Result<bool>;

    /// Carry out the decision made by `think`.
    async fn act(&mut self) -> Result<String>;

    async fn think_then_act(&mut self) -> Result<String> {
        if !self.think().await? {
            return Ok(THINKING_COMPLETE.to_string());
        }
        self.act().await
    }
}
