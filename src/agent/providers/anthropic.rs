//! Anthropic Messages API provider.
//!
//! Tool calls travel as `tool_use` content blocks on assistant turns and
//! results as `tool_result` blocks on user turns. The API requires
//! alternating roles, so neighbouring turns that map to the same role are
//! merged into one message.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{arguments_object, group_by_role, http_client, send_json};
use crate::agent::config::{Credential, ProviderSettings};
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{CostRates, LlmProvider};
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const FALLBACK_MAX_TOKENS: u32 = 8192;

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    credential: Credential,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl AnthropicProvider {
    /// Creates a provider from its settings.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the HTTP client cannot be built.
    pub fn new(settings: &ProviderSettings, timeout: Duration) -> Result<Self, AgentError> {
        Ok(Self {
            client: http_client(timeout)?,
            credential: settings.credential.clone(),
            model: settings.model.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn blocks(message: &ChatMessage) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !message.content.is_empty() {
            blocks.push(ContentBlock::Text {
                text: message.content.clone(),
            });
        }
        for call in &message.tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: arguments_object(&call.arguments),
            });
        }
        for result in &message.tool_results {
            blocks.push(ContentBlock::ToolResult {
                tool_use_id: result.tool_call_id.clone(),
                content: result.content.clone(),
                is_error: result.is_error,
            });
        }
        blocks
    }

    fn convert_messages(request: &ChatRequest) -> Vec<WireMessage> {
        let wire_role = |role: Role| match role {
            Role::Assistant => "assistant",
            Role::User | Role::Tool | Role::System => "user",
        };
        group_by_role(request.conversation(), wire_role)
            .into_iter()
            .map(|(role, members)| WireMessage {
                role,
                content: members.into_iter().flat_map(Self::blocks).collect(),
            })
            .filter(|m| !m.content.is_empty())
            .collect()
    }

    fn build_request<'a>(&'a self, request: &'a ChatRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(FALLBACK_MAX_TOKENS),
            system: request.system_prompt(),
            messages: Self::convert_messages(request),
            tools: request
                .tools
                .iter()
                .map(|t| WireTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
            temperature: request.temperature,
        }
    }

    fn parse_response(response: MessagesResponse) -> ChatResponse {
        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for block in response.content {
            match block {
                ContentBlock::Text { text: t } => text.push(t),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.to_string(),
                }),
                ContentBlock::ToolResult { .. } | ContentBlock::Unknown => {}
            }
        }
        ChatResponse {
            content: text.join("\n"),
            usage: TokenUsage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: response.usage.output_tokens,
                total_tokens: response
                    .usage
                    .input_tokens
                    .saturating_add(response.usage.output_tokens),
            },
            tool_calls,
            finish_reason: response.stop_reason,
        }
    }
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        self.credential.is_present()
    }

    fn cost_rates(&self) -> CostRates {
        CostRates::per_million(3.0, 15.0)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let api_key = self.credential.get().ok_or_else(|| AgentError::ApiKeyMissing {
            provider: self.name().to_string(),
        })?;

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let body = self.build_request(request);
        let http = self
            .client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body);

        let response: MessagesResponse = send_json(self.name(), http).await?;
        Ok(Self::parse_response(response))
    }
}
