//! Provider-agnostic message types for LLM communication.
//!
//! These types decouple agent logic from any specific LLM SDK,
//! allowing the same conversation to be sent to Anthropic, `OpenAI`,
//! Gemini, etc. A tool-result turn carries the whole batch of results
//! for the preceding assistant turn; adapters expand it as their wire
//! format requires.

use serde::{Deserialize, Serialize};

use super::tool::{ToolCall, ToolDefinition, ToolResult};

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
    /// Tool result batch.
    Tool,
}

/// A single chat message (one conversation turn).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
    /// Tool calls requested by the assistant (only for `Role::Assistant`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool results, one per preceding call (only for `Role::Tool`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
}

impl ChatMessage {
    /// Whether this turn is plain human-readable text (no tool traffic).
    #[must_use]
    pub fn is_plain_text(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant)
            && self.tool_calls.is_empty()
            && self.tool_results.is_empty()
    }

    /// Character count of everything the model will read in this turn.
    #[must_use]
    pub fn char_len(&self) -> usize {
        let calls: usize = self
            .tool_calls
            .iter()
            .map(|c| c.name.len() + c.arguments.len())
            .sum();
        let results: usize = self.tool_results.iter().map(|r| r.content.len()).sum();
        self.content.chars().count() + calls + results
    }
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Ordered conversation messages, system prompt first when present.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions available to the model.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

impl ChatRequest {
    /// Creates a request over the given messages with no tools.
    #[must_use]
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Attaches a tool catalogue.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// The system prompt, if the first message carries one.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Messages other than the system prompt.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Generated text content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason from the model (e.g., `"stop"`, `"tool_use"`).
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// A final text answer.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            finish_reason: Some("stop".to_string()),
            ..Self::default()
        }
    }

    /// A request to run tools before continuing.
    #[must_use]
    pub fn tool_use(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            finish_reason: Some("tool_use".to_string()),
            ..Self::default()
        }
    }

    /// Whether the model asked for tools instead of answering.
    #[must_use]
    pub fn requests_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
        tool_calls: Vec::new(),
        tool_results: Vec::new(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
        tool_calls: Vec::new(),
        tool_results: Vec::new(),
    }
}

/// Creates a plain assistant message.
#[must_use]
pub fn assistant_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
        tool_calls: Vec::new(),
        tool_results: Vec::new(),
    }
}

/// Creates an assistant message with tool calls and optional leading text.
#[must_use]
pub fn assistant_tool_calls_message(content: &str, tool_calls: Vec<ToolCall>) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.to_string(),
        tool_calls,
        tool_results: Vec::new(),
    }
}

/// Creates a tool-result turn holding the full batch of results.
#[must_use]
pub const fn tool_results_message(results: Vec<ToolResult>) -> ChatMessage {
    ChatMessage {
        role: Role::Tool,
        content: String::new(),
        tool_calls: Vec::new(),
        tool_results: results,
    }
}
