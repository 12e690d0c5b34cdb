//! Shared test helpers for agent tests.

use agentloop_config::LlmSettings;
use agentloop_core::error::ProviderError;
use agentloop_core::message::{Message, ToolCall};
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agentloop_providers::{LlmGateway, RetryPolicy};
use std::sync::{Arc, Mutex};

/// A mock provider that replays scripted replies in order.
///
/// Once the script is exhausted the last reply is repeated. Every request is
/// kept for inspection.
pub struct SequentialMockProvider {
    replies: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(replies: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        assert!(!replies.is_empty(), "SequentialMockProvider needs at least one reply");
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(messages: Vec<Message>) -> Self {
        Self::new(messages.into_iter().map(|m| Ok(make_response(m))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let index = requests.len().min(replies.len() - 1);
        requests.push(request);
        replies[index].clone()
    }
}

pub fn make_response(message: Message) -> ProviderResponse {
    ProviderResponse {
        message,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        metadata: serde_json::Map::new(),
    }
}

pub fn make_tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall::new(id, name, args.to_string())
}

/// A gateway over `provider` that retries without waiting.
pub fn mock_gateway(provider: Arc<dyn Provider>) -> Arc<LlmGateway> {
    Arc::new(LlmGateway::new(
        "default",
        LlmSettings::default(),
        provider,
        RetryPolicy::immediate(2),
    ))
}
