//! Agent configuration, lifecycle state and run outcome types.

use serde::{Deserialize, Serialize};

/// Configuration for the agent's behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Step budget per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Earlier identical assistant replies needed to declare the agent stuck
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: usize,

    /// Messages retained in conversational memory
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,

    /// Truncate tool observations to this many characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_observe: Option<usize>,

    /// Hard deadline applied to long-running tools
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

fn default_max_steps() -> u32 {
    30
}
fn default_duplicate_threshold() -> usize {
    2
}
fn default_memory_capacity() -> usize {
    crate::memory::DEFAULT_CAPACITY
}
fn default_tool_timeout_secs() -> u64 {
    60
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            duplicate_threshold: default_duplicate_threshold(),
            memory_capacity: default_memory_capacity(),
            max_observe: None,
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

/// Lifecycle state of one agent instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// How the most recent run ended.
///
/// The agent's [`AgentState`] is restored to its pre-run value when a run
/// returns, so this is the durable record of the terminal result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A step signalled completion.
    Finished,
    /// `max_steps` was reached without completion.
    BudgetExhausted,
    /// The run raised; holds the error text.
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_defaults() {
        let config: AgentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_steps, 30);
        assert_eq!(config.duplicate_threshold, 2);
        assert_eq!(config.memory_capacity, 100);
        assert!(config.max_observe.is_none());
    }

    #[test]
    fn state_starts_idle() {
        assert_eq!(AgentState::default(), AgentState::Idle);
        assert_eq!(AgentState::Finished.to_string(), "FINISHED");
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_value(RunOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["reason"], "boom");
    }
}
