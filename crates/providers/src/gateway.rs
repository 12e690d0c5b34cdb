//! Model-call gateway: the single path from agents to a model backend.
//!
//! A gateway is bound to one configuration profile. It validates messages,
//! prepends system prompts, applies the profile's defaults and retries
//! transient failures. Free-text calls go through [`LlmGateway::ask`];
//! tool-calling calls go through [`LlmGateway::ask_with_tools`].

use std::sync::Arc;
use std::time::Duration;

use agentloop_config::LlmSettings;
use agentloop_core::error::{GatewayError, ProviderError};
use agentloop_core::message::{Message, ToolCall};
use agentloop_core::provider::{
    Provider, ProviderRequest, StreamChunk, ToolChoice, ToolDefinition, Usage,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, with_retry};

/// Options for a tool-calling request.
#[derive(Debug, Clone)]
pub struct AskToolsOptions {
    pub tool_choice: ToolChoice,
    /// Per-attempt deadline; an expired attempt counts as a transient failure
    pub timeout: Duration,
    /// Overrides the profile temperature
    pub temperature: Option<f32>,
}

impl Default for AskToolsOptions {
    fn default() -> Self {
        Self {
            tool_choice: ToolChoice::Auto,
            timeout: Duration::from_secs(60),
            temperature: None,
        }
    }
}

/// What the model decided in tool-calling mode.
#[derive(Debug, Clone, Default)]
pub struct ModelDecision {
    /// Free text (a thought, or the answer itself)
    pub content: Option<String>,
    /// Tool calls the caller must act on
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
}

impl ModelDecision {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

pub struct LlmGateway {
    profile: String,
    settings: LlmSettings,
    provider: Arc<dyn Provider>,
    retry: RetryPolicy,
}

impl LlmGateway {
    pub fn new(
        profile: impl Into<String>,
        settings: LlmSettings,
        provider: Arc<dyn Provider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            profile: profile.into(),
            settings,
            provider,
            retry,
        }
    }

    /// Build a gateway that talks HTTP to the profile's endpoint.
    pub fn from_settings(
        profile: impl Into<String>,
        settings: LlmSettings,
        retry: RetryPolicy,
    ) -> Result<Self, ProviderError> {
        let profile = profile.into();
        let provider = OpenAiCompatProvider::from_settings(profile.clone(), &settings)?;
        Ok(Self::new(profile, settings, Arc::new(provider), retry))
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Check every message and return `system` followed by `messages`.
    pub fn format_messages(
        messages: &[Message],
        system: Option<&[Message]>,
    ) -> Result<Vec<Message>, GatewayError> {
        let system = system.unwrap_or_default();
        let mut formatted = Vec::with_capacity(system.len() + messages.len());
        for (position, message) in system.iter().chain(messages).enumerate() {
            message.validate().map_err(|reason| {
                GatewayError::InvalidMessage(format!("message {position} ({}): {reason}", message.role()))
            })?;
            formatted.push(message.clone());
        }
        Ok(formatted)
    }

    fn build_request(
        &self,
        messages: Vec<Message>,
        temperature: Option<f32>,
        stream: bool,
    ) -> ProviderRequest {
        ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: temperature.unwrap_or(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            tools: Vec::new(),
            tool_choice: None,
            stream,
            stop: Vec::new(),
        }
    }

    /// Send a conversation and return the model's text.
    ///
    /// With `stream`, incremental deltas are concatenated into one string.
    /// An empty reply fails with [`GatewayError::EmptyResponse`].
    pub async fn ask(
        &self,
        messages: &[Message],
        system: Option<&[Message]>,
        stream: bool,
        temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        let formatted = Self::format_messages(messages, system)?;
        let request = self.build_request(formatted, temperature, stream);

        debug!(
            profile = %self.profile,
            model = %request.model,
            messages = request.messages.len(),
            stream,
            "Asking model"
        );

        let provider = Arc::clone(&self.provider);
        let text = if stream {
            with_retry(&self.retry, "ask_stream", || {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                async move { collect_stream(provider.stream(request).await?).await }
            })
            .await?
        } else {
            let response = with_retry(&self.retry, "ask", || {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                async move { provider.complete(request).await }
            })
            .await?;
            log_usage(&self.profile, response.usage.as_ref());
            response.message.content().unwrap_or_default().to_string()
        };

        if text.trim().is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(text)
    }

    /// Send a conversation with a tool catalog and return the model's decision.
    pub async fn ask_with_tools(
        &self,
        messages: &[Message],
        system: Option<&[Message]>,
        tools: &[ToolDefinition],
        options: &AskToolsOptions,
    ) -> Result<ModelDecision, GatewayError> {
        let formatted = Self::format_messages(messages, system)?;
        let mut request = self.build_request(formatted, options.temperature, false);
        if !tools.is_empty() {
            request.tools = tools.to_vec();
            request.tool_choice = Some(options.tool_choice);
        }

        debug!(
            profile = %self.profile,
            model = %request.model,
            tools = tools.len(),
            tool_choice = ?options.tool_choice,
            "Asking model with tools"
        );

        let provider = Arc::clone(&self.provider);
        let deadline = options.timeout;
        let response = with_retry(&self.retry, "ask_with_tools", || {
            let provider = Arc::clone(&provider);
            let request = request.clone();
            async move {
                tokio::time::timeout(deadline, provider.complete(request))
                    .await
                    .map_err(|_| {
                        ProviderError::Timeout(format!("no response within {}s", deadline.as_secs()))
                    })?
            }
        })
        .await?;

        log_usage(&self.profile, response.usage.as_ref());

        let content = response
            .message
            .content()
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        Ok(ModelDecision {
            content,
            tool_calls: response.message.tool_calls().to_vec(),
            usage: response.usage,
        })
    }
}

async fn collect_stream(
    mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
) -> Result<String, ProviderError> {
    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        let chunk = chunk?;
        if let Some(delta) = chunk.content {
            text.push_str(&delta);
        }
        if chunk.done {
            break;
        }
    }
    Ok(text)
}

fn log_usage(profile: &str, usage: Option<&Usage>) {
    if let Some(usage) = usage {
        info!(
            profile = %profile,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Model usage"
        );
    }
}
