//! Domain event system: decoupled observation of agent runs.
//!
//! The agent publishes events as a run progresses. Subscribers (the CLI's
//! progress printer, tests) react without coupling to the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::agent::RunOutcome;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A run entered RUNNING
    RunStarted {
        agent: String,
        run_id: String,
        timestamp: DateTime<Utc>,
    },

    /// One think/act cycle finished
    StepCompleted {
        agent: String,
        step: u32,
        summary_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The duplicate-response detector fired
    StuckDetected {
        agent: String,
        step: u32,
        timestamp: DateTime<Utc>,
    },

    /// A run returned to the caller
    RunFinished {
        agent: String,
        run_id: String,
        steps: u32,
        outcome: RunOutcome,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
