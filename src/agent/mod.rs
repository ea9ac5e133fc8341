//! Assistant agent core.
//!
//! One [`Orchestrator`] owns a conversation and runs the tool-calling loop.
//! Completions go through the [`ModelRouter`], which picks a provider by
//! request complexity, retries transient failures and falls back along
//! the configured chain, recording every answered call in the
//! [`CostLedger`].
//!
//! # Architecture
//!
//! ```text
//! chat(message) → Orchestrator
//!   ├── ModelRouter
//!   │   ├── estimate_complexity → preferred provider
//!   │   ├── with_retry_if (per candidate)
//!   │   └── LlmProvider: Anthropic | OpenAI | Perplexity | Gemini | Ollama
//!   ├── ToolRegistry (tool calls, guarded, under timeout)
//!   └── Conversation (append-only within a turn)
//! ```

pub mod config;
pub mod conversation;
pub mod events;
pub mod ledger;
pub mod message;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod router;
pub mod tool;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use config::{AgentConfig, AgentConfigBuilder};
pub use conversation::Conversation;
pub use events::{AgentEvent, EventBus};
pub use ledger::{CostLedger, CostRecord, CostSummary};
pub use message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
pub use orchestrator::{BUSY_MESSAGE, Orchestrator, OrchestratorSettings};
pub use provider::{CostRates, LlmProvider};
pub use retry::{RetryOptions, with_retry, with_retry_if};
pub use router::{Comparison, Complexity, ModelRouter, ProviderStatus, RoutingResult};
pub use tool::{FieldKind, InputSchema, ToolCall, ToolDefinition, ToolResult};
