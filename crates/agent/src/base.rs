//! The step-driven agent state machine.
//!
//! [`AgentCore`] holds the data every agent shares. The [`Agent`] trait
//! supplies `run`, which drives `step` until the agent finishes, the step
//! budget runs out, or a step fails.

use std::sync::Arc;

use agentloop_core::agent::{AgentConfig, AgentState, RunOutcome};
use agentloop_core::error::{AgentError, Result};
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::memory::Memory;
use agentloop_core::message::Message;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

pub const STUCK_HINT: &str = "Observed duplicate responses. Consider new strategies and avoid repeating ineffective paths already attempted.";

pub const NO_STEPS_EXECUTED: &str = "No steps executed";

/// Strategy hints kept at once; the oldest is dropped first.
const MAX_STRATEGY_HINTS: usize = 4;

const PREVIEW_CHARS: usize = 120;

/// State shared by every agent.
pub struct AgentCore {
    pub name: String,
    pub description: Option<String>,
    pub memory: Memory,
    state: AgentState,

    pub current_step: u32,
    pub max_steps: u32,
    /// Earlier identical assistant replies that make the agent stuck
    pub duplicate_threshold: usize,

    pub system_prompt: Option<String>,
    pub next_step_prompt: Option<String>,
    strategy_hints: Vec<String>,

    last_outcome: Option<RunOutcome>,
    event_bus: Option<Arc<EventBus>>,
}

impl AgentCore {
    pub fn new(name: impl Into<String>, config: &AgentConfig) -> Self {
        Self {
            name: name.into(),
            description: None,
            memory: Memory::with_capacity(config.memory_capacity),
            state: AgentState::Idle,
            current_step: 0,
            max_steps: config.max_steps,
            duplicate_threshold: config.duplicate_threshold,
            system_prompt: None,
            next_step_prompt: None,
            strategy_hints: Vec::new(),
            last_outcome: None,
            event_bus: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.next_step_prompt = Some(prompt.into());
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn set_state(&mut self, state: AgentState) {
        self.state = state;
    }

    /// How the most recent run ended, if any has run.
    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    pub fn strategy_hints(&self) -> &[String] {
        &self.strategy_hints
    }

    pub fn update_memory(&mut self, message: Message) {
        self.memory.add(message);
    }

    /// True when the latest assistant reply repeats earlier ones.
    ///
    /// The newest assistant message with content is compared against every
    /// earlier assistant message, wherever it sits in memory; tool and user
    /// messages after it do not hide it. The agent is stuck once the number
    /// of identical earlier replies reaches `duplicate_threshold`.
    pub fn is_stuck(&self) -> bool {
        let messages = self.memory.messages();
        let Some((newest, content)) = messages.iter().enumerate().rev().find_map(|(i, m)| match m {
            Message::Assistant { content: Some(c), .. } if !c.is_empty() => Some((i, c)),
            _ => None,
        }) else {
            return false;
        };

        let duplicates = messages[..newest]
            .iter()
            .rev()
            .filter(|m| {
                matches!(m, Message::Assistant { content: Some(c), .. } if c == content)
            })
            .count();
        duplicates >= self.duplicate_threshold
    }

    /// Record the stuck hint so the next think sees it.
    pub fn handle_stuck_state(&mut self) {
        warn!(agent = %self.name, step = self.current_step, "Agent detected stuck state, adding strategy hint");
        self.add_strategy_hint(STUCK_HINT);
        self.publish(DomainEvent::StuckDetected {
            agent: self.name.clone(),
            step: self.current_step,
            timestamp: Utc::now(),
        });
    }

    /// Add a hint unless it is already present; the list never exceeds four.
    pub fn add_strategy_hint(&mut self, hint: &str) {
        if self.strategy_hints.iter().any(|h| h == hint) {
            return;
        }
        if self.strategy_hints.len() >= MAX_STRATEGY_HINTS {
            self.strategy_hints.remove(0);
        }
        self.strategy_hints.push(hint.to_string());
    }

    /// The prompt to show before the next model call: hints, then the
    /// configured next-step prompt.
    pub fn next_prompt(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .strategy_hints
            .iter()
            .map(String::as_str)
            .chain(self.next_step_prompt.as_deref())
            .filter(|p| !p.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    /// Return to a fresh IDLE agent, keeping configuration.
    pub fn reset(&mut self) {
        self.memory.clear();
        self.current_step = 0;
        self.strategy_hints.clear();
        self.state = AgentState::Idle;
        self.last_outcome = None;
    }

    pub fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }

    fn finish_run(&mut self, run_id: String, outcome: RunOutcome, restore: AgentState) {
        self.state = restore;
        self.publish(DomainEvent::RunFinished {
            agent: self.name.clone(),
            run_id,
            steps: self.current_step,
            outcome: outcome.clone(),
            timestamp: Utc::now(),
        });
        self.last_outcome = Some(outcome);
    }
}

/// A step-driven agent.
///
/// Implementors provide `step`; `run` is the shared execution loop.
#[async_trait]
pub trait Agent: Send {
    fn core(&self) -> &AgentCore;

    fn core_mut(&mut self) -> &mut AgentCore;

    /// Execute one step and describe what happened.
    async fn step(&mut self) -> Result<String>;

    /// Run until finished or out of steps and return the step transcript.
    ///
    /// Only an IDLE agent can run. The pre-run state is restored on return,
    /// whether the run succeeded or failed; [`AgentCore::last_outcome`]
    /// records how it ended.
    async fn run(&mut self, request: Option<String>) -> Result<String> {
        let prior = self.core().state();
        if prior != AgentState::Idle {
            return Err(AgentError::InvalidState(prior).into());
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        {
            let core = self.core_mut();
            if let Some(request) = request.filter(|r| !r.is_empty()) {
                core.update_memory(Message::user(request));
            }
            core.set_state(AgentState::Running);
            core.publish(DomainEvent::RunStarted {
                agent: core.name.clone(),
                run_id: run_id.clone(),
                timestamp: Utc::now(),
            });
            info!(agent = %core.name, run_id = %run_id, max_steps = core.max_steps, "Agent run starting");
        }

        let mut results = Vec::new();
        if let Err(e) = drive(&mut *self, &mut results).await {
            let core = self.core_mut();
            core.set_state(AgentState::Error);
            warn!(agent = %core.name, step = core.current_step, error = %e, "Agent run failed");
            core.finish_run(run_id, RunOutcome::Failed(e.to_string()), prior);
            return Err(e);
        }

        let core = self.core_mut();
        let stepped = !results.is_empty();
        let outcome = if core.state() == AgentState::Finished {
            RunOutcome::Finished
        } else {
            if stepped {
                results.push(format!(
                    "Terminated: step budget exhausted (max_steps = {})",
                    core.max_steps
                ));
            }
            RunOutcome::BudgetExhausted
        };
        info!(agent = %core.name, steps = core.current_step, outcome = ?outcome, "Agent run finished");
        core.finish_run(run_id, outcome, prior);

        if results.is_empty() {
            return Ok(NO_STEPS_EXECUTED.to_string());
        }
        Ok(results.join("\n"))
    }
}

async fn drive<A: Agent + ?Sized>(agent: &mut A, results: &mut Vec<String>) -> Result<()> {
    loop {
        let core = agent.core_mut();
        if core.current_step >= core.max_steps || core.state() == AgentState::Finished {
            return Ok(());
        }
        core.current_step += 1;
        let step = core.current_step;
        info!(agent = %core.name, step, max_steps = core.max_steps, "Executing step");

        let result = agent.step().await?;

        let core = agent.core_mut();
        if core.is_stuck() {
            core.handle_stuck_state();
        }
        core.publish(DomainEvent::StepCompleted {
            agent: core.name.clone(),
            step,
            summary_preview: result.chars().take(PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });
        results.push(format!("Step {step}: {result}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_core::error::Error;
    use agentloop_core::message::ToolCall;
    use std::collections::VecDeque;

    /// Replays scripted step results; `Finished` marks the agent done.
    struct ScriptedAgent {
        core: AgentCore,
        script: VecDeque<Result<(String, bool)>>,
    }

    impl ScriptedAgent {
        fn new(max_steps: u32, script: Vec<Result<(String, bool)>>) -> Self {
            let config = AgentConfig {
                max_steps,
                ..AgentConfig::default()
            };
            Self {
                core: AgentCore::new("scripted", &config),
                script: script.into(),
            }
        }
    }

    #[async_trait]
    impl Agent for ScriptedAgent {
        fn core(&self) -> &AgentCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut AgentCore {
            &mut self.core
        }

        async fn step(&mut self) -> Result<String> {
            match self.script.pop_front() {
                Some(Ok((text, finish))) => {
                    self.core.update_memory(Message::assistant(text.clone()));
                    if finish {
                        self.core.set_state(AgentState::Finished);
                    }
                    Ok(text)
                }
                Some(Err(e)) => Err(e),
                None => Ok("idle".into()),
            }
        }
    }

    fn ok(text: &str) -> Result<(String, bool)> {
        Ok((text.to_string(), false))
    }

    fn finish(text: &str) -> Result<(String, bool)> {
        Ok((text.to_string(), true))
    }

    #[tokio::test]
    async fn run_collects_step_lines_until_finished() {
        let mut agent = ScriptedAgent::new(5, vec![ok("looking"), finish("done")]);
        let output = agent.run(Some("do it".into())).await.unwrap();

        assert_eq!(output, "Step 1: looking\nStep 2: done");
        assert_eq!(agent.core().state(), AgentState::Idle);
        assert_eq!(agent.core().last_outcome(), Some(&RunOutcome::Finished));
        assert_eq!(agent.core().memory.messages()[0], Message::user("do it"));
    }

    #[tokio::test]
    async fn budget_exhaustion_is_reported() {
        let mut agent = ScriptedAgent::new(2, vec![ok("a"), ok("b"), ok("c")]);
        let output = agent.run(None).await.unwrap();

        assert_eq!(
            output,
            "Step 1: a\nStep 2: b\nTerminated: step budget exhausted (max_steps = 2)"
        );
        assert_eq!(agent.core().current_step, 2);
        assert_eq!(agent.core().last_outcome(), Some(&RunOutcome::BudgetExhausted));
    }

    #[tokio::test]
    async fn non_idle_run_is_rejected_without_touching_memory() {
        let mut agent = ScriptedAgent::new(5, vec![ok("a")]);
        agent.core_mut().set_state(AgentState::Running);

        let err = agent.run(Some("hello".into())).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Agent(AgentError::InvalidState(AgentState::Running))
        ));
        assert!(agent.core().memory.is_empty());
        assert!(agent.core().last_outcome().is_none());
    }

    #[tokio::test]
    async fn failures_restore_state_and_record_outcome() {
        let mut agent = ScriptedAgent::new(
            5,
            vec![ok("a"), Err(AgentError::ToolCallRequired.into())],
        );
        let err = agent.run(None).await.unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::ToolCallRequired)));
        assert_eq!(agent.core().state(), AgentState::Idle);
        assert!(matches!(
            agent.core().last_outcome(),
            Some(RunOutcome::Failed(reason)) if reason.contains("Tool calls required")
        ));

        // Re-invocable after failure
        agent.script = vec![finish("recovered")].into();
        assert!(agent.run(None).await.is_ok());
    }

    #[tokio::test]
    async fn zero_step_budget_executes_nothing() {
        let mut agent = ScriptedAgent::new(0, vec![]);
        let output = agent.run(None).await.unwrap();
        assert_eq!(output, NO_STEPS_EXECUTED);
        assert_eq!(agent.core().last_outcome(), Some(&RunOutcome::BudgetExhausted));
    }

    #[tokio::test]
    async fn step_counter_carries_over_until_reset() {
        let mut agent = ScriptedAgent::new(1, vec![ok("a"), ok("b")]);
        agent.run(None).await.unwrap();
        let second = agent.run(None).await.unwrap();
        assert_eq!(second, NO_STEPS_EXECUTED);

        agent.core_mut().reset();
        assert_eq!(agent.run(None).await.unwrap(), "Step 1: b\nTerminated: step budget exhausted (max_steps = 1)");
    }

    #[test]
    fn stuck_at_threshold_only() {
        let mut core = AgentCore::new("t", &AgentConfig::default());
        core.update_memory(Message::assistant("same"));
        core.update_memory(Message::user("again"));
        core.update_memory(Message::assistant("same"));
        // One earlier duplicate, threshold is two
        assert!(!core.is_stuck());

        core.update_memory(Message::assistant("same"));
        assert!(core.is_stuck());
    }

    #[test]
    fn trailing_tool_output_does_not_hide_repeats() {
        let mut core = AgentCore::new("t", &AgentConfig::default());
        assert!(!core.is_stuck());
        for i in 0..3 {
            let call = ToolCall::new(format!("c{i}"), "planning", r#"{"command":"list"}"#);
            core.update_memory(Message::from_tool_calls(Some("Let me list plans".into()), vec![call]));
            core.update_memory(Message::tool("No plans available.", "planning", format!("c{i}")));
        }
        assert!(core.is_stuck());
    }

    #[test]
    fn only_the_newest_assistant_reply_is_compared() {
        let mut core = AgentCore::new("t", &AgentConfig::default());
        for _ in 0..3 {
            core.update_memory(Message::assistant("same"));
        }
        core.update_memory(Message::assistant("something new"));
        core.update_memory(Message::user("go on"));
        assert!(!core.is_stuck());
    }

    #[test]
    fn strategy_hints_are_bounded_and_deduplicated() {
        let mut core = AgentCore::new("t", &AgentConfig::default())
            .with_next_step_prompt("Pick the next tool.");
        core.handle_stuck_state();
        core.handle_stuck_state();
        assert_eq!(core.strategy_hints().len(), 1);
        assert_eq!(
            core.next_prompt().unwrap(),
            format!("{STUCK_HINT}\nPick the next tool.")
        );
        // The stored prompt is never rewritten
        assert_eq!(core.next_step_prompt.as_deref(), Some("Pick the next tool."));

        for i in 0..6 {
            core.add_strategy_hint(&format!("hint {i}"));
        }
        assert_eq!(core.strategy_hints().len(), 4);
        assert_eq!(core.strategy_hints()[0], "hint 2");
    }

    #[tokio::test]
    async fn run_publishes_lifecycle_events() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let mut agent = ScriptedAgent::new(3, vec![finish("done")]);
        agent.core = AgentCore::new("scripted", &AgentConfig::default()).with_event_bus(bus);

        agent.run(None).await.unwrap();

        assert!(matches!(*rx.recv().await.unwrap(), DomainEvent::RunStarted { .. }));
        assert!(matches!(
            *rx.recv().await.unwrap(),
            DomainEvent::StepCompleted { step: 1, .. }
        ));
        match &*rx.recv().await.unwrap() {
            DomainEvent::RunFinished { outcome, steps, .. } => {
                assert_eq!(*outcome, RunOutcome::Finished);
                assert_eq!(*steps, 1);
            }
            other => panic!("Expected RunFinished, got {other:?}"),
        }
    }
}
