//! # agentloop core
//!
//! Domain types, traits, and error definitions for the agentloop execution
//! engine. Every other crate depends inward on this one.
//!
//! - [`message`]: the closed `Message` sum type and tool calls
//! - [`memory`]: bounded conversational memory
//! - [`provider`]: the `Provider` trait over chat-completion backends
//! - [`tool`]: the `Tool` trait and the containing `ToolRegistry`
//! - [`agent`]: lifecycle state and run outcome
//! - [`event`]: broadcast domain events

pub mod error;
pub mod message;
pub mod memory;
pub mod provider;
pub mod tool;
pub mod agent;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{FunctionCall, Message, MessageRecord, Role, ToolCall};
pub use memory::Memory;
pub use provider::{Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolChoice, ToolDefinition};
pub use tool::{Tool, ToolResult, ToolRegistry};
pub use agent::{AgentConfig, AgentState, RunOutcome};
pub use event::{DomainEvent, EventBus};
