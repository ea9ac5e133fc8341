//! Scripted provider for router and orchestrator tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::message::{ChatRequest, ChatResponse};
use super::provider::{CostRates, LlmProvider};
use super::tool::ToolCall;
use crate::error::AgentError;

/// Provider that replays a fixed list of outcomes.
pub struct ScriptedProvider {
    name: String,
    enabled: AtomicBool,
    script: Mutex<VecDeque<Result<ChatResponse, AgentError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn disabled(name: &str) -> Self {
        let provider = Self::new(name);
        provider.set_enabled(false);
        provider
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn push(&self, outcome: Result<ChatResponse, AgentError>) -> &Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    pub fn push_text(&self, text: &str) -> &Self {
        self.push(Ok(ChatResponse::text(text)))
    }

    pub fn push_tool_calls(&self, calls: &[(&str, &str, &str)]) -> &Self {
        let calls = calls
            .iter()
            .map(|(id, name, args)| ToolCall {
                id: (*id).to_string(),
                name: (*name).to_string(),
                arguments: (*args).to_string(),
            })
            .collect();
        self.push(Ok(ChatResponse::tool_use("", calls)))
    }

    pub fn push_error(&self, message: &str, status: Option<u16>) -> &Self {
        self.push(Err(AgentError::ApiRequest {
            provider: self.name.clone(),
            message: message.to_string(),
            status,
        }))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn cost_rates(&self) -> CostRates {
        CostRates::per_million(1.0, 2.0)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        next.unwrap_or_else(|| {
            Err(AgentError::InvalidResponse {
                provider: self.name.clone(),
                message: "script exhausted".to_string(),
            })
        })
    }
}
