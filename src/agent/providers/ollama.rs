//! Local Ollama `/api/chat` provider.
//!
//! Enabled when an endpoint is configured. Runs locally, so every call
//! is free.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{arguments_object, http_client, send_json};
use crate::agent::config::ProviderSettings;
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{CostRates, LlmProvider};
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

/// Ollama provider.
#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    message: Option<ReplyMessage>,
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ReplyToolCall>,
}

#[derive(Debug, Deserialize)]
struct ReplyToolCall {
    function: ReplyFunction,
}

#[derive(Debug, Deserialize)]
struct ReplyFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaProvider {
    /// Creates a provider from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the HTTP client cannot be built.
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Result<Self, AgentError> {
        Ok(Self {
            client: http_client(timeout)?,
            model: settings.model.clone(),
            base_url: settings.base_url.clone().filter(|u| !u.trim().is_empty()),
        })
    }

    fn convert_message(message: &ChatMessage) -> Vec<Value> {
        match message.role {
            Role::System => vec![json!({ "role": "system", "content": message.content })],
            Role::User => vec![json!({ "role": "user", "content": message.content })],
            Role::Assistant => {
                let mut value = json!({ "role": "assistant", "content": message.content });
                if !message.tool_calls.is_empty() {
                    let calls: Vec<Value> = message
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "function": {
                                    "name": c.name,
                                    "arguments": arguments_object(&c.arguments),
                                }
                            })
                        })
                        .collect();
                    value["tool_calls"] = Value::Array(calls);
                }
                vec![value]
            }
            Role::Tool => message
                .tool_results
                .iter()
                .map(|r| json!({ "role": "tool", "content": r.content, "tool_name": r.tool_name }))
                .collect(),
        }
    }

    fn build_body(&self, request: &ChatRequest) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .flat_map(Self::convert_message)
            .collect();
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut options = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        body
    }

    fn parse_reply(reply: ChatReply) -> ChatResponse {
        let (content, calls) = reply
            .message
            .map(|m| (m.content, m.tool_calls))
            .unwrap_or_default();
        let tool_calls = calls
            .into_iter()
            .enumerate()
            .map(|(i, call)| ToolCall {
                id: format!("ollama_{i}"),
                name: call.function.name,
                arguments: if call.function.arguments.is_null() {
                    "{}".to_string()
                } else {
                    call.function.arguments.to_string()
                },
            })
            .collect();
        ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: reply.prompt_eval_count,
                completion_tokens: reply.eval_count,
                total_tokens: reply.prompt_eval_count.saturating_add(reply.eval_count),
            },
            tool_calls,
            finish_reason: reply.done_reason,
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    fn cost_rates(&self) -> CostRates {
        CostRates::free()
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let base_url = self
            .base_url
            .as_deref()
            .ok_or_else(|| AgentError::ApiKeyMissing {
                provider: self.name().to_string(),
            })?;
        let url = format!("{}/api/chat", base_url.trim_end_matches('/'));
        let http = self.client.post(url).json(&self.build_body(request));
        let reply: ChatReply = send_json(self.name(), http).await?;
        Ok(Self::parse_reply(reply))
    }
}
