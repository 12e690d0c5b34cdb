//! Error types for the agentloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

use crate::agent::AgentState;

/// The top-level error type for all agentloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Model-call gateway errors ---
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Agent lifecycle errors ---
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Transport-level failures reported by a model backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Network faults, throttling, timeouts and server-side (5xx, 408, 409)
    /// responses are transient. Authentication, malformed requests and
    /// configuration problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_)
            | Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => {
                *status_code >= 500 || matches!(status_code, 408 | 409)
            }
            Self::AuthenticationFailed(_) | Self::ModelNotFound(_) | Self::NotConfigured(_) => {
                false
            }
        }
    }
}

/// Failures surfaced by the model-call gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Model unavailable after {attempts} attempts: {last}")]
    ModelUnavailable { attempts: u32, last: ProviderError },

    /// A non-transient provider failure, returned without retrying.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Cannot combine tool results: field '{field}' is populated on both sides")]
    Unmergeable { field: &'static str },

    #[error(transparent)]
    Planning(#[from] PlanningError),

    /// A bug inside a tool. Never converted into a `ToolResult`.
    #[error("Tool defect in {tool_name}: {reason}")]
    Defect { tool_name: String, reason: String },
}

impl ToolError {
    /// Defects escape the registry's containment boundary.
    pub fn is_defect(&self) -> bool {
        matches!(self, Self::Defect { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("A plan with ID '{0}' already exists")]
    DuplicateId(String),

    #[error("No plan found with ID: {0}")]
    NotFound(String),

    #[error("No active plan. Please specify a plan_id or set an active plan.")]
    NoActivePlan,

    #[error("Invalid step_index: {index} (plan has {len} steps)")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Parameter `{0}` is required")]
    MissingField(&'static str),

    #[error("Invalid step_status '{0}'. Use one of: not_started, in_progress, completed, blocked")]
    InvalidStatus(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Cannot run agent from state: {0}")]
    InvalidState(AgentState),

    #[error("Tool calls required but none provided")]
    ToolCallRequired,

    #[error("Flow has no agents")]
    NoAgents,

    #[error("No agent registered under key '{0}'")]
    UnknownAgent(String),
}
