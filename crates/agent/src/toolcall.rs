//! Tool-calling agent: the model picks tools, the agent runs them and feeds
//! the observations back.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agentloop_core::agent::{AgentConfig, AgentState};
use agentloop_core::error::{AgentError, Result};
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::message::{Message, ToolCall};
use agentloop_core::provider::ToolChoice;
use agentloop_core::tool::{ToolRegistry, ToolResult};
use agentloop_providers::{AskToolsOptions, LlmGateway};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::base::{Agent, AgentCore};
use crate::react::ReAct;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an agent that can execute tool calls";

pub const DEFAULT_NEXT_STEP_PROMPT: &str =
    "If you want to stop interaction, use `terminate` tool/function call.";

const NOTHING_TO_EXECUTE: &str = "No content or commands to execute";

pub struct ToolCallAgent {
    core: AgentCore,
    gateway: Arc<LlmGateway>,
    tools: ToolRegistry,
    tool_choice: ToolChoice,
    /// Tools whose execution finishes the run
    special_tool_names: Vec<String>,
    /// Calls chosen by the last think, consumed by act
    tool_calls: Vec<ToolCall>,
    max_observe: Option<usize>,
    request_timeout: Duration,
}

impl ToolCallAgent {
    pub fn new(
        name: impl Into<String>,
        gateway: Arc<LlmGateway>,
        tools: ToolRegistry,
        config: &AgentConfig,
    ) -> Self {
        let core = AgentCore::new(name, config)
            .with_system_prompt(DEFAULT_SYSTEM_PROMPT)
            .with_next_step_prompt(DEFAULT_NEXT_STEP_PROMPT);
        Self {
            core,
            gateway,
            tools,
            tool_choice: ToolChoice::Auto,
            special_tool_names: vec!["terminate".into()],
            tool_calls: Vec::new(),
            max_observe: config.max_observe,
            request_timeout: AskToolsOptions::default().timeout,
        }
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = tool_choice;
        self
    }

    pub fn with_special_tools(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.special_tool_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.core.system_prompt = Some(prompt.into());
        self
    }

    /// An empty prompt disables the per-step user message.
    pub fn with_next_step_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.core.next_step_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.core = self.core.with_event_bus(bus);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    fn is_special_tool(&self, name: &str) -> bool {
        self.special_tool_names
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name))
    }

    /// Run one call and render what the model should observe.
    async fn execute_tool(&mut self, call: &ToolCall) -> Result<String> {
        let name = call.name().to_string();
        if !self.tools.contains(&name) {
            warn!(agent = %self.core.name, tool = %name, "Model requested an unknown tool");
            return Ok(format!("Error: Unknown tool '{name}'"));
        }

        debug!(tool = %name, arguments = %call.function.arguments, "Activating tool");
        let started = Instant::now();
        let result = self.tools.invoke_call(call).await?;
        self.core.publish(DomainEvent::ToolExecuted {
            tool_name: name.clone(),
            success: !result.is_error(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        self.handle_special_tool(&name, &result);
        Ok(render_observation(&name, &result))
    }

    fn handle_special_tool(&mut self, name: &str, result: &ToolResult) {
        if !self.is_special_tool(name) || result.is_error() {
            return;
        }
        info!(agent = %self.core.name, tool = %name, "Special tool has completed the task");
        self.core.set_state(AgentState::Finished);
    }
}

fn render_observation(name: &str, result: &ToolResult) -> String {
    let output = result.output_text().filter(|text| !text.is_empty());
    if let Some(error) = &result.error {
        // Partial output printed before a failure is still shown
        return match output {
            Some(text) => format!("Error: {error}\nOutput of cmd `{name}` before the error:\n{text}"),
            None => format!("Error: {error}"),
        };
    }
    match output {
        Some(text) => format!("Observed output of cmd `{name}` executed:\n{text}"),
        None => format!("Cmd `{name}` completed with no output"),
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}

#[async_trait]
impl Agent for ToolCallAgent {
    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    async fn step(&mut self) -> Result<String> {
        self.think_then_act().await
    }
}

#[async_trait]
impl ReAct for ToolCallAgent {
    async fn think(&mut self) -> Result<bool> {
        if let Some(prompt) = self.core.next_prompt() {
            self.core.update_memory(Message::user(prompt));
        }

        let system: Option<Vec<Message>> =
            self.core.system_prompt.as_ref().map(|p| vec![Message::system(p.clone())]);
        let options = AskToolsOptions {
            tool_choice: self.tool_choice,
            timeout: self.request_timeout,
            temperature: None,
        };
        let decision = self
            .gateway
            .ask_with_tools(
                self.core.memory.messages(),
                system.as_deref(),
                &self.tools.schema(),
                &options,
            )
            .await?;

        info!(
            agent = %self.core.name,
            thoughts = decision.content.as_deref().unwrap_or(""),
            tools_selected = decision.tool_calls.len(),
            "Agent thought"
        );
        if !decision.tool_calls.is_empty() {
            let names: Vec<&str> = decision.tool_calls.iter().map(ToolCall::name).collect();
            info!(agent = %self.core.name, tools = ?names, "Tools prepared");
        }

        let content = decision.content;
        if self.tool_choice == ToolChoice::None {
            if !decision.tool_calls.is_empty() {
                warn!(agent = %self.core.name, "Model tried to use tools when they were not available");
            }
            self.tool_calls.clear();
            return Ok(match content {
                Some(content) => {
                    self.core.update_memory(Message::assistant(content));
                    true
                }
                None => false,
            });
        }

        self.tool_calls = decision.tool_calls;
        let has_content = content.is_some();
        if has_content || !self.tool_calls.is_empty() {
            self.core
                .update_memory(Message::from_tool_calls(content, self.tool_calls.clone()));
        }

        Ok(match self.tool_choice {
            // An empty selection is rejected by act
            ToolChoice::Required => true,
            _ if self.tool_calls.is_empty() => has_content,
            _ => true,
        })
    }

    async fn act(&mut self) -> Result<String> {
        if self.tool_calls.is_empty() {
            if self.tool_choice == ToolChoice::Required {
                return Err(AgentError::ToolCallRequired.into());
            }
            return Ok(self
                .core
                .memory
                .last()
                .and_then(Message::content)
                .unwrap_or(NOTHING_TO_EXECUTE)
                .to_string());
        }

        let calls = std::mem::take(&mut self.tool_calls);
        let mut results = Vec::with_capacity(calls.len());
        for call in &calls {
            let mut observation = self.execute_tool(call).await?;
            if let Some(max) = self.max_observe {
                observation = truncate_chars(observation, max);
            }
            info!(
                agent = %self.core.name,
                tool = %call.name(),
                chars = observation.len(),
                "Tool completed"
            );
            self.core
                .update_memory(Message::tool(observation.clone(), call.name(), call.id.clone()));
            results.push(observation);
        }
        Ok(results.join("\n\n"))
    }
}
