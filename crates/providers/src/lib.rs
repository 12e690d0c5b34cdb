//! Model-call plumbing for agentloop.
//!
//! - [`openai_compat`]: the HTTP chat-completions provider
//! - [`retry`]: random exponential backoff over transient failures
//! - [`gateway`]: validation, system prompts and profile defaults
//! - [`registry`]: one gateway per profile, built from configuration

pub mod gateway;
pub mod openai_compat;
pub mod registry;
pub mod retry;

pub use gateway::{AskToolsOptions, LlmGateway, ModelDecision};
pub use openai_compat::OpenAiCompatProvider;
pub use registry::{GatewayRegistry, build_from_config};
pub use retry::{RetryPolicy, with_retry};
