//! Conversation state owned by one orchestrator.
//!
//! Turns are append-only between explicit clears. Every tool call in an
//! assistant turn must be answered by exactly one result, matched by call
//! id, in the turn that immediately follows; [`Conversation::push_tool_results`]
//! rejects batches that break this.

use std::collections::HashSet;

use super::message::{
    ChatMessage, Role, assistant_message, assistant_tool_calls_message, tool_results_message,
    user_message,
};
use super::tool::{ToolCall, ToolResult};
use crate::error::AgentError;

/// Ordered chat turns.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatMessage>,
}

impl Conversation {
    /// Creates an empty conversation.
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// Appends a user turn.
    pub fn push_user(&mut self, content: &str) {
        self.turns.push(user_message(content));
    }

    /// Appends a final assistant answer.
    pub fn push_assistant(&mut self, content: &str) {
        self.turns.push(assistant_message(content));
    }

    /// Appends an assistant turn that requests tools and returns its calls.
    ///
    /// Empty or repeated call ids are replaced with `call_<turn>_<index>`
    /// so every call can be answered by exactly one result.
    pub fn push_tool_calls(&mut self, content: &str, mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let turn = self.turns.len();
        let mut seen = HashSet::new();
        for (index, call) in calls.iter_mut().enumerate() {
            if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
                call.id = format!("call_{turn}_{index}");
                seen.insert(call.id.clone());
            }
        }
        self.turns
            .push(assistant_tool_calls_message(content, calls.clone()));
        calls
    }

    /// Drops a trailing tool-call turn that was never answered.
    pub fn discard_pending(&mut self) {
        if !self.pending_calls().is_empty() {
            self.turns.pop();
        }
    }

    /// Calls still waiting for results: those of a trailing tool-call turn.
    #[must_use]
    pub fn pending_calls(&self) -> &[ToolCall] {
        match self.turns.last() {
            Some(turn) if turn.role == Role::Assistant => &turn.tool_calls,
            _ => &[],
        }
    }

    /// Appends the result batch for the pending tool calls.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::HistoryMismatch`] unless the batch answers every
    /// pending call exactly once.
    pub fn push_tool_results(&mut self, results: Vec<ToolResult>) -> Result<(), AgentError> {
        let pending = self.pending_calls();
        if pending.is_empty() {
            return Err(AgentError::HistoryMismatch {
                message: "no tool calls are pending".to_string(),
            });
        }
        if pending.len() != results.len() {
            return Err(AgentError::HistoryMismatch {
                message: format!(
                    "expected {} results, got {}",
                    pending.len(),
                    results.len()
                ),
            });
        }

        let expected: HashSet<&str> = pending.iter().map(|c| c.id.as_str()).collect();
        let mut seen = HashSet::new();
        for result in &results {
            let id = result.tool_call_id.as_str();
            if !expected.contains(id) {
                return Err(AgentError::HistoryMismatch {
                    message: format!("result for unknown call id '{id}'"),
                });
            }
            if !seen.insert(id) {
                return Err(AgentError::HistoryMismatch {
                    message: format!("duplicate result for call id '{id}'"),
                });
            }
        }

        self.turns.push(tool_results_message(results));
        Ok(())
    }

    /// Removes every turn.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// All turns, tool traffic included.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.turns
    }

    /// User turns and plain assistant answers only.
    #[must_use]
    pub fn visible(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .filter(|t| t.is_plain_text())
            .cloned()
            .collect()
    }

    /// Number of turns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the conversation has no turns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
