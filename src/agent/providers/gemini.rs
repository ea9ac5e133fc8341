//! Google Gemini `generateContent` provider.
//!
//! Gemini matches function responses to calls by name and issues no call
//! ids, so ids are synthesized per response (`gemini_<n>`). Outgoing
//! function responses are keyed by the tool name recorded on each result.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{arguments_object, group_by_role, http_client, send_json};
use crate::agent::config::{Credential, ProviderSettings};
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{CostRates, LlmProvider};
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::error::AgentError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    credential: Credential,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: UsageMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

impl GeminiProvider {
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

    fn parts(message: &ChatMessage) -> Vec<Value> {
        let mut parts = Vec::new();
        if !message.content.is_empty() {
            parts.push(json!({ "text": message.content }));
        }
        for call in &message.tool_calls {
            parts.push(json!({
                "functionCall": { "name": call.name, "args": arguments_object(&call.arguments) }
            }));
        }
        for result in &message.tool_results {
            parts.push(json!({
                "functionResponse": {
                    "name": result.tool_name,
                    "response": { "content": result.content, "is_error": result.is_error }
                }
            }));
        }
        parts
    }

    fn contents(request: &ChatRequest) -> Vec<Value> {
        let wire_role = |role: Role| match role {
            Role::Assistant => "model",
            Role::User | Role::Tool | Role::System => "user",
        };
        group_by_role(request.conversation(), wire_role)
            .into_iter()
            .filter_map(|(role, members)| {
                let parts: Vec<Value> = members.into_iter().flat_map(Self::parts).collect();
                (!parts.is_empty()).then(|| json!({ "role": role, "parts": parts }))
            })
            .collect()
    }

    /// Function declaration for one tool. Parameter-less tools omit the
    /// schema, which the API rejects when `properties` is empty.
    fn declaration(tool: &ToolDefinition) -> Value {
        let has_properties = tool
            .parameters
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|p| !p.is_empty());
        if has_properties {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
            })
        } else {
            json!({ "name": tool.name, "description": tool.description })
        }
    }

    fn build_body(request: &ChatRequest) -> Value {
        let mut body = json!({ "contents": Self::contents(request) });
        if let Some(system) = request.system_prompt() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request.tools.iter().map(Self::declaration).collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
        let mut generation = serde_json::Map::new();
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".to_string(), json!(temperature));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }

    fn parse_response(response: GenerateResponse) -> ChatResponse {
        let candidate = response.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let parts = candidate
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default();

        let mut text = Vec::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(t) = part.text {
                text.push(t);
            }
            if let Some(call) = part.function_call {
                tool_calls.push(ToolCall {
                    id: format!("gemini_{}", tool_calls.len()),
                    name: call.name,
                    arguments: if call.args.is_null() {
                        "{}".to_string()
                    } else {
                        call.args.to_string()
                    },
                });
            }
        }

        let usage = response.usage_metadata;
        ChatResponse {
            content: text.concat(),
            usage: TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
            tool_calls,
            finish_reason,
        }
    }
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        self.credential.is_present()
    }

    fn cost_rates(&self) -> CostRates {
        CostRates::per_million(0.075, 0.3)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let api_key = self.credential.get().ok_or_else(|| AgentError::ApiKeyMissing {
            provider: self.name().to_string(),
        })?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let http = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&Self::build_body(request));

        let response: GenerateResponse = send_json(self.name(), http).await?;
        Ok(Self::parse_response(response))
    }
}
