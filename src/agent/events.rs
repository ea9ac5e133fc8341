//! Progress events for front-ends.
//!
//! The router and orchestrator publish [`AgentEvent`]s on an [`EventBus`].
//! Publishing never blocks and never fails: with no subscribers the event
//! is dropped, and slow subscribers observe a lag instead of stalling the
//! agent.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Events buffered per subscriber before lagging.
const EVENT_CAPACITY: usize = 256;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A provider round-trip is starting.
    Thinking {
        /// 1-based iteration number.
        step: usize,
    },
    /// A tool is about to run.
    ToolCall {
        /// Tool name.
        name: String,
        /// Parsed input.
        input: Value,
    },
    /// A tool finished.
    ToolResult {
        /// Tool name.
        name: String,
        /// Whether it succeeded.
        success: bool,
    },
    /// A provider answered.
    Routed {
        /// Provider that answered.
        provider: String,
        /// Wall-clock latency in milliseconds.
        latency_ms: u64,
        /// Estimated cost in US dollars.
        cost: f64,
    },
    /// A provider failed and the router moved on.
    Fallback {
        /// Provider that failed.
        from: String,
        /// Its final error.
        error: String,
    },
    /// The turn failed.
    Error {
        /// Error message.
        message: String,
    },
    /// The turn completed.
    Done,
}

impl AgentEvent {
    /// Short event name, as used for SSE event types.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Routed { .. } => "routed",
            Self::Fallback { .. } => "fallback",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// Broadcast channel for [`AgentEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default per-subscriber buffer.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publishes an event to current subscribers.
    pub fn emit(&self, event: AgentEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
