//! OpenAI-compatible provider implementation.
//!
//! Speaks the `/chat/completions` protocol used by OpenAI, Azure OpenAI,
//! OpenRouter, vLLM, Ollama and most self-hosted gateways.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use / function calling with a `tool_choice` policy
//! - Azure's `api-key` header and `api-version` query parameter

use std::collections::BTreeMap;

use agentloop_config::{ApiType, LlmSettings};
use agentloop_core::error::ProviderError;
use agentloop_core::message::{Message, MessageRecord, ToolCall};
use agentloop_core::provider::*;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    api_type: ApiType,
    api_version: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-style provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_type: ApiType::OpenAi,
            api_version: String::new(),
            client,
        })
    }

    /// Build a provider for one configured profile.
    pub fn from_settings(name: impl Into<String>, settings: &LlmSettings) -> Result<Self, ProviderError> {
        let mut provider = Self::new(name, &settings.base_url, &settings.api_key)?;
        provider.api_type = settings.api_type;
        provider.api_version = settings.api_version.clone();
        Ok(provider)
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "https://api.openai.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Result<Self, ProviderError> {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    fn endpoint(&self) -> String {
        match self.api_type {
            ApiType::OpenAi => format!("{}/chat/completions", self.base_url),
            ApiType::Azure => format!(
                "{}/chat/completions?api-version={}",
                self.base_url, self.api_version
            ),
        }
    }

    /// Convert our messages to the wire records.
    fn to_api_messages(messages: &[Message]) -> Vec<MessageRecord> {
        messages.iter().map(Message::to_record).collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            if let Some(choice) = request.tool_choice {
                body["tool_choice"] = serde_json::json!(choice);
            }
        }

        if !request.stop.is_empty() {
            body["stop"] = serde_json::json!(request.stop);
        }

        body
    }

    /// POST the body and map HTTP failures onto `ProviderError`.
    async fn send(&self, body: &serde_json::Value, sse: bool) -> Result<reqwest::Response, ProviderError> {
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json");

        builder = match self.api_type {
            ApiType::OpenAi => builder.header("Authorization", format!("Bearer {}", self.api_key)),
            ApiType::Azure => builder.header("api-key", &self.api_key),
        };

        if sse {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(e.to_string())
            } else {
                ProviderError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status == 404 {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::ModelNotFound(error_body));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

/// Turn a decoded completion body into a provider response.
fn parse_completion(api_response: ApiResponse) -> Result<ProviderResponse, ProviderError> {
    let choice = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ApiError {
            status_code: 200,
            message: "No choices in response".into(),
        })?;

    let message = Message::from_tool_calls(
        choice.message.content,
        choice.message.tool_calls.unwrap_or_default(),
    );

    Ok(ProviderResponse {
        message,
        usage: api_response.usage.map(Usage::from),
        model: api_response.model,
        metadata: serde_json::Map::new(),
    })
}

#[async_trait]
impl agentloop_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        parse_completion(api_response)
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        let body = Self::build_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Read the SSE byte stream and forward decoded chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut decoder = SseDecoder::new(provider_name);

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for event in decoder.feed(&bytes) {
                    let (chunk, last) = match event {
                        SseEvent::Delta(content) => (
                            StreamChunk {
                                content: Some(content),
                                tool_calls: Vec::new(),
                                done: false,
                                usage: None,
                            },
                            false,
                        ),
                        SseEvent::Done(usage) => (decoder.final_chunk(usage), true),
                    };
                    if tx.send(Ok(chunk)).await.is_err() || last {
                        return;
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx.send(Ok(decoder.final_chunk(None))).await;
        });

        Ok(rx)
    }
}

// --- SSE decoding ---

#[derive(Debug, PartialEq)]
enum SseEvent {
    /// A non-empty content delta
    Delta(String),
    /// End of the response, with usage when the server reported it
    Done(Option<Usage>),
}

/// Incremental decoder for a chat-completions event stream.
///
/// Bytes may split lines arbitrarily; only complete lines are decoded.
struct SseDecoder {
    provider: String,
    buffer: String,
    /// Tool call deltas keyed by their stream index
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
}

impl SseDecoder {
    fn new(provider: String) -> Self {
        Self {
            provider,
            buffer: String::new(),
            tool_calls: BTreeMap::new(),
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut events = Vec::new();

        while let Some(line_end) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                events.push(SseEvent::Done(None));
                return events;
            }

            match serde_json::from_str::<StreamResponse>(data) {
                Ok(stream_resp) => {
                    if let Some(choice) = stream_resp.choices.into_iter().next() {
                        for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
                            let acc = self.tool_calls.entry(tc_delta.index).or_default();
                            if let Some(id) = tc_delta.id {
                                acc.id = id;
                            }
                            if let Some(func) = tc_delta.function {
                                if let Some(name) = func.name {
                                    acc.name = name;
                                }
                                if let Some(args) = func.arguments {
                                    acc.arguments.push_str(&args);
                                }
                            }
                        }

                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            events.push(SseEvent::Delta(content));
                        }
                    }

                    // Usage arrives in the last chunk when include_usage is set
                    if let Some(usage) = stream_resp.usage {
                        events.push(SseEvent::Done(Some(usage.into())));
                        return events;
                    }
                }
                Err(e) => {
                    trace!(
                        provider = %self.provider,
                        data = %data,
                        error = %e,
                        "Ignoring unparseable SSE chunk"
                    );
                }
            }
        }

        events
    }

    fn final_chunk(&mut self, usage: Option<Usage>) -> StreamChunk {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(ToolCallAccumulator::into_tool_call)
            .collect();
        StreamChunk {
            content: None,
            tool_calls,
            done: true,
            usage,
        }
    }
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall::new(self.id, self.name, self.arguments)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentloop_core::Provider;

    fn request(tools: Vec<ToolDefinition>, tool_choice: Option<ToolChoice>) -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            messages: vec![Message::system("You are helpful"), Message::user("Hello")],
            temperature: 0.2,
            max_tokens: Some(256),
            tools,
            tool_choice,
            stream: false,
            stop: vec![],
        }
    }

    fn planning_tool() -> ToolDefinition {
        ToolDefinition {
            name: "planning".into(),
            description: "Manage plans".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(None).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert!(provider.base_url.contains("localhost:11434"));
    }

    #[test]
    fn azure_endpoint_carries_api_version() {
        let settings = LlmSettings {
            api_type: ApiType::Azure,
            base_url: "https://example.openai.azure.com/openai/deployments/gpt4/".into(),
            ..LlmSettings::default()
        };
        let provider = OpenAiCompatProvider::from_settings("azure", &settings).unwrap();
        assert_eq!(
            provider.endpoint(),
            "https://example.openai.azure.com/openai/deployments/gpt4/chat/completions?api-version=2024-02-15-preview"
        );

        let openai = OpenAiCompatProvider::openai("sk-test").unwrap();
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn body_includes_tool_choice_only_with_tools() {
        let body = OpenAiCompatProvider::build_body(
            &request(vec![planning_tool()], Some(ToolChoice::Required)),
            false,
        );
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "planning");
        assert_eq!(body["max_tokens"], 256);

        let body = OpenAiCompatProvider::build_body(&request(vec![], Some(ToolChoice::Auto)), true);
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn body_messages_use_wire_roles() {
        let body = OpenAiCompatProvider::build_body(&request(vec![], None), false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn tool_message_keeps_call_id() {
        let api_msgs =
            OpenAiCompatProvider::to_api_messages(&[Message::tool("result data", "planning", "call_1")]);
        let json = serde_json::to_value(&api_msgs[0]).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert_eq!(json["name"], "planning");
    }

    #[test]
    fn parse_completion_with_tool_calls() {
        let data = r#"{
            "model": "gpt-4o",
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "call_1", "type": "function",
                    "function": {"name": "terminate", "arguments": "{\"status\":\"success\"}"}}]
            }}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let parsed: ApiResponse = serde_json::from_str(data).unwrap();
        let response = parse_completion(parsed).unwrap();
        assert!(response.message.content().is_none());
        assert_eq!(response.message.tool_calls()[0].name(), "terminate");
        assert_eq!(response.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn parse_completion_without_choices_fails() {
        let parsed: ApiResponse = serde_json::from_str(r#"{"model": "m", "choices": []}"#).unwrap();
        assert!(parse_completion(parsed).is_err());
    }

    // --- SSE decoding tests ---

    #[test]
    fn decoder_handles_lines_split_across_reads() {
        let mut decoder = SseDecoder::new("test".into());
        let first = decoder.feed(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());

        let second = decoder.feed(b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" world\"}}]}\n");
        assert_eq!(
            second,
            vec![SseEvent::Delta("Hello".into()), SseEvent::Delta(" world".into())]
        );
    }

    #[test]
    fn decoder_stops_at_done() {
        let mut decoder = SseDecoder::new("test".into());
        let events = decoder.feed(b": keep-alive\ndata: [DONE]\ndata: {\"choices\":[]}\n");
        assert_eq!(events, vec![SseEvent::Done(None)]);
    }

    #[test]
    fn decoder_assembles_tool_calls_in_index_order() {
        let mut decoder = SseDecoder::new("test".into());
        let stream = concat!(
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"terminate","arguments":""}}]}}]}"#, "\n",
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"planning","arguments":"{\"command\""}}]}}]}"#, "\n",
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":": \"list\"}"}}]}}]}"#, "\n",
            r#"data: {"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#, "\n",
        );
        let events = decoder.feed(stream.as_bytes());
        assert!(matches!(events.last(), Some(SseEvent::Done(Some(_)))));

        let chunk = decoder.final_chunk(None);
        assert!(chunk.done);
        assert_eq!(chunk.tool_calls.len(), 2);
        assert_eq!(chunk.tool_calls[0].id, "call_a");
        assert_eq!(chunk.tool_calls[0].function.arguments, "{\"command\": \"list\"}");
        assert_eq!(chunk.tool_calls[1].name(), "terminate");
    }

    #[test]
    fn decoder_ignores_garbage() {
        let mut decoder = SseDecoder::new("test".into());
        assert!(decoder.feed(b"data: {not json}\nevent: ping\n").is_empty());
    }
}
