//! End-to-end integration tests for the agentloop runtime.
//!
//! These tests wire the real crates together the way the binary does
//! (configuration → gateway → tool registry → agent) with a scripted model
//! behind the gateway.

use std::io::Write;
use std::sync::{Arc, Mutex};

use agentloop_agent::{Agent, ToolCallAgent};
use agentloop_config::AppConfig;
use agentloop_core::agent::RunOutcome;
use agentloop_core::error::ProviderError;
use agentloop_core::event::{DomainEvent, EventBus};
use agentloop_core::message::{Message, ToolCall};
use agentloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use agentloop_providers::{LlmGateway, RetryPolicy, build_from_config};
use agentloop_tools::default_registry;

// ── Mock Provider ────────────────────────────────────────────────────────

/// Replays scripted replies in sequence and records every request.
struct ScriptedProvider {
    replies: Mutex<Vec<Result<Message, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<Result<Message, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let replies = self.replies.lock().unwrap();
        let reply = replies
            .get(requests.len())
            .cloned()
            .unwrap_or_else(|| panic!("ScriptedProvider exhausted after {} calls", requests.len()));
        requests.push(request);
        reply.map(|message| ProviderResponse {
            message,
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

fn call(id: &str, name: &str, args: serde_json::Value) -> Result<Message, ProviderError> {
    Ok(Message::from_tool_calls(
        None,
        vec![ToolCall::new(id, name, args.to_string())],
    ))
}

const CONFIG: &str = r#"
[llm]
model = "gpt-4o"
temperature = 0.2
api_key = "sk-test"

[llm.fast]
model = "gpt-4o-mini"

[agent]
max_steps = 6

[retry]
max_attempts = 3
min_wait_ms = 0
max_wait_ms = 0
"#;

fn load_config() -> AppConfig {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    AppConfig::load_from(file.path()).unwrap()
}

fn gateway(config: &AppConfig, profile: &str, provider: Arc<dyn Provider>) -> Arc<LlmGateway> {
    Arc::new(LlmGateway::new(
        profile,
        config.profile(profile),
        provider,
        RetryPolicy::from_settings(&config.retry),
    ))
}

// ── E2E: Planning then terminate ─────────────────────────────────────────

#[tokio::test]
async fn e2e_plan_track_and_terminate() {
    let config = load_config();
    let provider = Arc::new(ScriptedProvider::new(vec![
        call(
            "c1",
            "planning",
            serde_json::json!({
                "command": "create",
                "plan_id": "trip",
                "title": "Weekend trip",
                "steps": ["Pick destination", "Book hotel"]
            }),
        ),
        call(
            "c2",
            "planning",
            serde_json::json!({"command": "mark_step", "step_index": 0, "step_status": "completed"}),
        ),
        call("c3", "terminate", serde_json::json!({"status": "success"})),
    ]));

    let mut agent = ToolCallAgent::new(
        "e2e",
        gateway(&config, "default", provider.clone()),
        default_registry(&config.agent),
        &config.agent,
    );

    let transcript = agent
        .run(Some("Plan a weekend trip".into()))
        .await
        .expect("Agent should succeed");

    let step_lines = transcript
        .lines()
        .filter_map(|l| l.split_once(": "))
        .filter(|(head, _)| {
            head.strip_prefix("Step ")
                .is_some_and(|n| n.parse::<u32>().is_ok())
        })
        .count();
    assert_eq!(step_lines, 3);
    assert!(transcript.contains("Plan created successfully with ID: trip"));
    assert!(transcript.contains("Progress: 1/2 steps completed"));
    assert!(transcript.contains("The interaction has been completed with status: success"));
    assert!(!transcript.contains("Terminated: step budget exhausted"));

    assert_eq!(provider.calls(), 3);
    assert_eq!(agent.core().last_outcome(), Some(&RunOutcome::Finished));

    // Profile settings reach the wire request
    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests[0].model, "gpt-4o");
    assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(requests[0].tools.len(), 3);
}

// ── E2E: Named profile inherits from default ────────────────────────────

#[tokio::test]
async fn e2e_named_profile_overrides_model_only() {
    let config = load_config();
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(Message::assistant("pong"))]));
    let gw = gateway(&config, "fast", provider.clone());

    let answer = gw.ask(&[Message::user("ping")], None, false, None).await.unwrap();
    assert_eq!(answer, "pong");

    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests[0].model, "gpt-4o-mini");
    assert!((requests[0].temperature - 0.2).abs() < f32::EPSILON);
}

// ── E2E: Transient failures are absorbed by the gateway ─────────────────

#[tokio::test]
async fn e2e_transient_failures_are_retried_within_a_step() {
    let config = load_config();
    let overloaded = || -> Result<Message, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 503,
            message: "overloaded".into(),
        })
    };
    let provider = Arc::new(ScriptedProvider::new(vec![
        overloaded(),
        overloaded(),
        call("c1", "terminate", serde_json::json!({"status": "success"})),
    ]));

    let mut agent = ToolCallAgent::new(
        "e2e",
        gateway(&config, "default", provider.clone()),
        default_registry(&config.agent),
        &config.agent,
    );
    let transcript = agent.run(Some("finish up".into())).await.unwrap();

    assert!(transcript.starts_with("Step 1: Observed output of cmd `terminate` executed:"));
    assert_eq!(provider.calls(), 3);
}

#[tokio::test]
async fn e2e_exhausted_retries_fail_the_run() {
    let config = load_config();
    let provider = Arc::new(ScriptedProvider::new(vec![
        Err(ProviderError::Network("connection reset".into()));
        3
    ]));

    let mut agent = ToolCallAgent::new(
        "e2e",
        gateway(&config, "default", provider.clone()),
        default_registry(&config.agent),
        &config.agent,
    );
    let err = agent.run(Some("hello".into())).await.unwrap_err();

    assert!(err.to_string().contains("Model unavailable after 3 attempts"));
    assert!(matches!(agent.core().last_outcome(), Some(RunOutcome::Failed(_))));
    // The agent can be reused after a failed run
    assert_eq!(agent.core().state(), agentloop_core::agent::AgentState::Idle);
}

// ── E2E: Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_events_follow_the_run() {
    let config = load_config();
    let provider = Arc::new(ScriptedProvider::new(vec![call(
        "c1",
        "terminate",
        serde_json::json!({"status": "success"}),
    )]));
    let bus = Arc::new(EventBus::new(32));
    let mut rx = bus.subscribe();

    let mut agent = ToolCallAgent::new(
        "e2e",
        gateway(&config, "default", provider),
        default_registry(&config.agent),
        &config.agent,
    )
    .with_event_bus(Arc::clone(&bus));
    agent.run(Some("stop".into())).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match &*event {
            DomainEvent::RunStarted { .. } => "started",
            DomainEvent::ToolExecuted { .. } => "tool",
            DomainEvent::StepCompleted { .. } => "step",
            DomainEvent::StuckDetected { .. } => "stuck",
            DomainEvent::RunFinished { .. } => "finished",
        });
    }
    assert_eq!(kinds, vec!["started", "tool", "step", "finished"]);
}

// ── E2E: Gateway registry from configuration ────────────────────────────

#[test]
fn e2e_registry_builds_every_profile() {
    let config = load_config();
    let registry = build_from_config(&config).unwrap();
    assert_eq!(registry.list(), vec!["default", "fast"]);
    assert_eq!(registry.get("fast").unwrap().model(), "gpt-4o-mini");
    assert_eq!(registry.get("missing").unwrap().profile(), "default");
}
