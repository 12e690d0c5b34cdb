//! Multi-agent flows.
//!
//! An [`AgentSet`] keeps agents under string keys in insertion order and
//! names one of them primary. A [`Flow`] decides how input moves through
//! the set; [`PrimaryAgentFlow`] hands it straight to the primary agent.

use agentloop_core::error::{AgentError, Result};
use async_trait::async_trait;
use tracing::info;

use crate::base::Agent;

/// Key used when a set is built from a single agent.
pub const DEFAULT_AGENT_KEY: &str = "default";

/// Agents addressed by key.
///
/// Without an explicit primary key the first agent added is primary.
#[derive(Default)]
pub struct AgentSet {
    agents: Vec<(String, Box<dyn Agent>)>,
    primary: Option<String>,
}

impl AgentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// One agent under [`DEFAULT_AGENT_KEY`].
    pub fn single(agent: Box<dyn Agent>) -> Self {
        Self::from_named([(DEFAULT_AGENT_KEY.to_string(), agent)])
    }

    /// Agents keyed `agent_0`, `agent_1`, ... in order.
    pub fn from_list(agents: impl IntoIterator<Item = Box<dyn Agent>>) -> Self {
        Self::from_named(
            agents
                .into_iter()
                .enumerate()
                .map(|(i, agent)| (format!("agent_{i}"), agent)),
        )
    }

    pub fn from_named(agents: impl IntoIterator<Item = (String, Box<dyn Agent>)>) -> Self {
        let mut set = Self::new();
        for (key, agent) in agents {
            set.add(key, agent);
        }
        set
    }

    pub fn with_primary(mut self, key: impl Into<String>) -> Self {
        self.primary = Some(key.into());
        self
    }

    /// Add an agent; an existing agent with the same key is replaced in place.
    pub fn add(&mut self, key: impl Into<String>, agent: Box<dyn Agent>) {
        let key = key.into();
        match self.agents.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = agent,
            None => self.agents.push((key, agent)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&dyn Agent> {
        self.agents
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, agent)| agent.as_ref())
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Box<dyn Agent>> {
        self.agents
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, agent)| agent)
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary
            .as_deref()
            .or_else(|| self.agents.first().map(|(k, _)| k.as_str()))
    }

    pub fn primary(&self) -> Option<&dyn Agent> {
        self.primary_key().and_then(|key| self.get(key))
    }

    /// The primary agent, or why there is none.
    pub fn primary_mut(&mut self) -> Result<&mut Box<dyn Agent>> {
        let key = self.primary_key().ok_or(AgentError::NoAgents)?.to_string();
        self.get_mut(&key)
            .ok_or_else(|| AgentError::UnknownAgent(key).into())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

/// Executes input over a set of agents.
#[async_trait]
pub trait Flow: Send {
    fn agents(&self) -> &AgentSet;

    fn agents_mut(&mut self) -> &mut AgentSet;

    async fn execute(&mut self, input: &str) -> Result<String>;
}

/// Runs the primary agent on the input.
pub struct PrimaryAgentFlow {
    agents: AgentSet,
}

impl PrimaryAgentFlow {
    pub fn new(agents: AgentSet) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Flow for PrimaryAgentFlow {
    fn agents(&self) -> &AgentSet {
        &self.agents
    }

    fn agents_mut(&mut self) -> &mut AgentSet {
        &mut self.agents
    }

    async fn execute(&mut self, input: &str) -> Result<String> {
        let agent = self.agents.primary_mut()?;
        info!(agent = %agent.core().name, "Flow executing on primary agent");
        agent.run(Some(input.to_string())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::AgentCore;
    use agentloop_core::agent::{AgentConfig, AgentState};
    use agentloop_core::error::Error;
    use agentloop_core::message::Message;

    /// Answers with its own name and the request, then finishes.
    struct NamedAgent {
        core: AgentCore,
    }

    fn named(name: &str) -> Box<dyn Agent> {
        Box::new(NamedAgent {
            core: AgentCore::new(name, &AgentConfig::default()),
        })
    }

    #[async_trait]
    impl Agent for NamedAgent {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AgentCore {
            &mut self.core
        }

        async fn step(&mut self) -> Result<String> {
            let request = self
                .core
                .memory
                .last()
                .and_then(Message::content)
                .unwrap_or_default()
                .to_string();
            self.core.set_state(AgentState::Finished);
            Ok(format!("{} handled {request}", self.core.name))
        }
    }

    #[test]
    fn sets_key_agents_by_construction() {
        let single = AgentSet::single(named("solo"));
        assert_eq!(single.keys().collect::<Vec<_>>(), vec!["default"]);

        let list = AgentSet::from_list([named("a"), named("b")]);
        assert_eq!(list.keys().collect::<Vec<_>>(), vec!["agent_0", "agent_1"]);
        assert_eq!(list.primary_key(), Some("agent_0"));
        assert_eq!(list.primary().unwrap().core().name, "a");
    }

    #[test]
    fn adding_an_existing_key_replaces_it() {
        let mut set = AgentSet::from_named([("planner".to_string(), named("old"))]);
        set.add("executor", named("exec"));
        set.add("planner", named("new"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["planner", "executor"]);
        assert_eq!(set.get("planner").unwrap().core().name, "new");
        assert!(set.get("missing").is_none());
    }

    #[tokio::test]
    async fn primary_flow_runs_the_primary_agent() {
        let set = AgentSet::from_named([
            ("planner".to_string(), named("planner")),
            ("executor".to_string(), named("executor")),
        ])
        .with_primary("executor");
        let mut flow = PrimaryAgentFlow::new(set);

        let output = flow.execute("ship it").await.unwrap();
        assert_eq!(output, "Step 1: executor handled ship it");
        assert!(flow.agents().get("planner").unwrap().core().memory.is_empty());
    }

    #[tokio::test]
    async fn missing_primary_is_an_error() {
        let mut empty = PrimaryAgentFlow::new(AgentSet::new());
        assert!(matches!(
            empty.execute("hi").await.unwrap_err(),
            Error::Agent(AgentError::NoAgents)
        ));

        let mut flow = PrimaryAgentFlow::new(AgentSet::single(named("solo")).with_primary("ghost"));
        assert!(matches!(
            flow.execute("hi").await.unwrap_err(),
            Error::Agent(AgentError::UnknownAgent(key)) if key == "ghost"
        ));
    }
}
