//! `OpenAI` provider implementation using the `async-openai` crate.
//!
//! Supports any `OpenAI`-compatible API via the base URL override in
//! [`ProviderSettings`]. Perplexity is served by the same adapter with
//! its own endpoint and tool support switched off.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
    ChatCompletionRequestAssistantMessageContent, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessage, ChatCompletionRequestSystemMessageContent,
    ChatCompletionRequestToolMessage, ChatCompletionRequestToolMessageContent,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent, ChatCompletionTool,
    ChatCompletionToolType, CreateChatCompletionRequest, FunctionCall, FunctionObject,
};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;

use super::{http_client, transport_error};
use crate::agent::config::{Credential, ProviderSettings};
use crate::agent::message::{ChatMessage, ChatRequest, ChatResponse, Role, TokenUsage};
use crate::agent::provider::{CostRates, LlmProvider};
use crate::agent::tool::ToolCall;
use crate::error::AgentError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";

/// `OpenAI`-compatible LLM provider.
///
/// Wraps the `async-openai` client for chat completions. The SDK client is
/// assembled per call from the shared credential, so a key supplied after
/// startup is picked up without rebuilding the provider.
pub struct OpenAiProvider {
    name: &'static str,
    http: reqwest::Client,
    credential: Credential,
    model: String,
    base_url: String,
    tools_enabled: bool,
    rates: CostRates,
}

impl OpenAiProvider {
    /// Creates the `OpenAI` provider.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the HTTP client cannot be built.
    pub fn openai(settings: &ProviderSettings, timeout: Duration) -> Result<Self, AgentError> {
        Self::with_endpoint(
            "openai",
            settings,
            OPENAI_BASE_URL,
            true,
            CostRates::per_million(0.15, 0.6),
            timeout,
        )
    }

    /// Creates the Perplexity provider (`OpenAI`-compatible, no tools).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if the HTTP client cannot be built.
    pub fn perplexity(settings: &ProviderSettings, timeout: Duration) -> Result<Self, AgentError> {
        Self::with_endpoint(
            "perplexity",
            settings,
            PERPLEXITY_BASE_URL,
            false,
            CostRates::per_million(0.1, 0.4),
            timeout,
        )
    }

    fn with_endpoint(
        name: &'static str,
        settings: &ProviderSettings,
        default_base_url: &str,
        tools_enabled: bool,
        rates: CostRates,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        Ok(Self {
            name,
            http: http_client(timeout)?,
            credential: settings.credential.clone(),
            model: settings.model.clone(),
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string()),
            tools_enabled,
            rates,
        })
    }

    fn client(&self, api_key: &str) -> Client<OpenAIConfig> {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&self.base_url);
        // Retries belong to the router; the SDK gives up after one attempt.
        let no_retry = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();
        Client::with_config(config)
            .with_http_client(self.http.clone())
            .with_backoff(no_retry)
    }

    /// Converts one of our turns to zero or more SDK messages.
    ///
    /// A tool-result batch expands to one `tool` message per result. When
    /// tools are disabled, tool traffic is dropped and only text survives.
    fn convert_message(msg: &ChatMessage, tools_enabled: bool) -> Vec<ChatCompletionRequestMessage> {
        match msg.role {
            Role::System => vec![ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(msg.content.clone()),
                    name: None,
                },
            )],
            Role::User => vec![ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessage {
                    content: ChatCompletionRequestUserMessageContent::Text(msg.content.clone()),
                    name: None,
                },
            )],
            Role::Assistant => {
                let tool_calls = if msg.tool_calls.is_empty() || !tools_enabled {
                    None
                } else {
                    Some(
                        msg.tool_calls
                            .iter()
                            .map(|tc| ChatCompletionMessageToolCall {
                                id: tc.id.clone(),
                                r#type: ChatCompletionToolType::Function,
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                };

                let content = if msg.content.is_empty() {
                    None
                } else {
                    Some(ChatCompletionRequestAssistantMessageContent::Text(
                        msg.content.clone(),
                    ))
                };

                if content.is_none() && tool_calls.is_none() {
                    return Vec::new();
                }

                #[allow(deprecated)]
                let message = ChatCompletionRequestAssistantMessage {
                    content,
                    name: None,
                    tool_calls,
                    refusal: None,
                    audio: None,
                    function_call: None,
                };
                vec![ChatCompletionRequestMessage::Assistant(message)]
            }
            Role::Tool if tools_enabled => msg
                .tool_results
                .iter()
                .map(|result| {
                    ChatCompletionRequestMessage::Tool(ChatCompletionRequestToolMessage {
                        content: ChatCompletionRequestToolMessageContent::Text(
                            result.content.clone(),
                        ),
                        tool_call_id: result.tool_call_id.clone(),
                    })
                })
                .collect(),
            Role::Tool => Vec::new(),
        }
    }

    /// Builds an `OpenAI` chat completion request from our generic request.
    fn build_request(&self, request: &ChatRequest) -> CreateChatCompletionRequest {
        let messages: Vec<_> = request
            .messages
            .iter()
            .flat_map(|m| Self::convert_message(m, self.tools_enabled))
            .collect();

        let tools = if request.tools.is_empty() || !self.tools_enabled {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|td| ChatCompletionTool {
                        r#type: ChatCompletionToolType::Function,
                        function: FunctionObject {
                            name: td.name.clone(),
                            description: Some(td.description.clone()),
                            parameters: Some(td.parameters.clone()),
                            strict: None,
                        },
                    })
                    .collect(),
            )
        };

        CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: request.temperature,
            max_completion_tokens: request.max_tokens,
            tools,
            ..Default::default()
        }
    }

    fn map_error(&self, err: OpenAIError) -> AgentError {
        match err {
            OpenAIError::Reqwest(e) => transport_error(self.name, &e),
            OpenAIError::ApiError(api) => AgentError::ApiRequest {
                provider: self.name.to_string(),
                status: status_hint(api.r#type.as_deref(), api.code.as_deref()),
                message: api.message,
            },
            OpenAIError::JSONDeserialize(e) => AgentError::InvalidResponse {
                provider: self.name.to_string(),
                message: e.to_string(),
            },
            other => AgentError::ApiRequest {
                provider: self.name.to_string(),
                message: other.to_string(),
                status: None,
            },
        }
    }
}

/// HTTP status implied by an API error body.
///
/// The SDK drops the status code, so it is recovered from the documented
/// error `type`/`code` values.
fn status_hint(kind: Option<&str>, code: Option<&str>) -> Option<u16> {
    let matches = |needle: &str| kind == Some(needle) || code == Some(needle);
    if matches("rate_limit_exceeded") || matches("requests") || matches("tokens") {
        Some(429)
    } else if matches("invalid_api_key") || matches("authentication_error") {
        Some(401)
    } else if matches("server_error") {
        Some(500)
    } else {
        None
    }
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_enabled(&self) -> bool {
        self.credential.is_present()
    }

    fn supports_tools(&self) -> bool {
        self.tools_enabled
    }

    fn cost_rates(&self) -> CostRates {
        self.rates
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, AgentError> {
        let api_key = self.credential.get().ok_or_else(|| AgentError::ApiKeyMissing {
            provider: self.name.to_string(),
        })?;
        let openai_request = self.build_request(request);

        let response = self
            .client(&api_key)
            .chat()
            .create(openai_request)
            .await
            .map_err(|e| self.map_error(e))?;

        let choice = response.choices.first();

        let content = choice
            .and_then(|c| c.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        let tool_calls = choice
            .and_then(|c| c.message.tool_calls.as_ref())
            .map(|tcs| {
                tcs.iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments: tc.function.arguments.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let finish_reason = choice.and_then(|c| {
            c.finish_reason
                .as_ref()
                .map(|fr| format!("{fr:?}").to_lowercase())
        });

        let usage = response
            .usage
            .map_or_else(TokenUsage::default, |u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            });

        Ok(ChatResponse {
            content,
            usage,
            tool_calls,
            finish_reason,
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message;
    use crate::agent::tool::{ToolDefinition, ToolResult};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base_url: Option<String>, key: Option<&str>) -> ProviderSettings {
        ProviderSettings {
            credential: key.map(Credential::new).unwrap_or_default(),
            model: "gpt-test".to_string(),
            base_url,
        }
    }

    fn provider(base_url: Option<String>, key: Option<&str>) -> OpenAiProvider {
        OpenAiProvider::openai(&settings(base_url, key), Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!())
    }

    fn tool_turns() -> Vec<ChatMessage> {
        vec![
            message::assistant_tool_calls_message(
                "",
                vec![
                    ToolCall {
                        id: "call_1".to_string(),
                        name: "git_status".to_string(),
                        arguments: "{}".to_string(),
                    },
                    ToolCall {
                        id: "call_2".to_string(),
                        name: "git_diff".to_string(),
                        arguments: "{}".to_string(),
                    },
                ],
            ),
            message::tool_results_message(vec![
                ToolResult {
                    tool_call_id: "call_1".to_string(),
                    tool_name: "git_status".to_string(),
                    content: "Branch: main".to_string(),
                    is_error: false,
                },
                ToolResult {
                    tool_call_id: "call_2".to_string(),
                    tool_name: "git_diff".to_string(),
                    content: "No changes".to_string(),
                    is_error: false,
                },
            ]),
        ]
    }

    #[test]
    fn test_convert_system_message() {
        let converted = OpenAiProvider::convert_message(&message::system_message("test"), true);
        assert!(matches!(
            converted.as_slice(),
            [ChatCompletionRequestMessage::System(_)]
        ));
    }

    #[test]
    fn test_tool_batch_expands_per_result() {
        let turns = tool_turns();
        let converted = OpenAiProvider::convert_message(&turns[1], true);
        assert_eq!(converted.len(), 2);
        assert!(
            converted
                .iter()
                .all(|m| matches!(m, ChatCompletionRequestMessage::Tool(_)))
        );
    }

    #[test]
    fn test_convert_assistant_with_tool_calls() {
        let turns = tool_turns();
        let converted = OpenAiProvider::convert_message(&turns[0], true);
        if let [ChatCompletionRequestMessage::Assistant(a)] = converted.as_slice() {
            assert_eq!(a.tool_calls.as_ref().map_or(0, Vec::len), 2);
        } else {
            panic!("Expected one Assistant message");
        }
    }

    #[test]
    fn test_tool_traffic_dropped_without_tool_support() {
        let turns = tool_turns();
        assert!(OpenAiProvider::convert_message(&turns[0], false).is_empty());
        assert!(OpenAiProvider::convert_message(&turns[1], false).is_empty());
    }

    #[test]
    fn test_perplexity_request_omits_tools() {
        let perplexity = OpenAiProvider::perplexity(&settings(None, Some("pk")), Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!());
        let mut messages = vec![message::user_message("status?")];
        messages.extend(tool_turns());
        let request = ChatRequest::new(messages).with_tools(vec![ToolDefinition {
            name: "git_status".to_string(),
            description: "Status".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }]);
        let built = perplexity.build_request(&request);
        assert!(built.tools.is_none());
        assert_eq!(built.messages.len(), 1);
        assert!(!perplexity.supports_tools());
        assert_eq!(perplexity.base_url, PERPLEXITY_BASE_URL);
    }

    #[test]
    fn test_build_request_with_tools() {
        let request = ChatRequest {
            messages: vec![message::user_message("test")],
            temperature: Some(0.2),
            max_tokens: Some(100),
            tools: vec![ToolDefinition {
                name: "read_file".to_string(),
                description: "Read".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            }],
        };
        let built = provider(None, Some("k")).build_request(&request);
        assert_eq!(built.model, "gpt-test");
        assert_eq!(built.tools.as_ref().map_or(0, Vec::len), 1);
        assert_eq!(built.max_completion_tokens, Some(100));
    }

    #[tokio::test]
    async fn test_late_credential_enables_provider() {
        let settings = settings(None, None);
        let provider = OpenAiProvider::openai(&settings, Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!());
        assert!(!provider.is_enabled());
        let err = provider
            .chat(&ChatRequest::new(vec![message::user_message("hi")]))
            .await;
        assert!(matches!(err, Err(AgentError::ApiKeyMissing { .. })));

        settings.credential.set("sk-late");
        assert!(provider.is_enabled());
    }

    #[tokio::test]
    async fn test_chat_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "created": 1_700_000_000,
                "model": "gpt-test",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {"name": "git_status", "arguments": "{}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let response = provider(Some(server.uri()), Some("sk-test"))
            .chat(&ChatRequest::new(vec![message::user_message("status?")]))
            .await
            .unwrap_or_else(|e| panic!("chat failed: {e}"));
        assert!(response.requests_tools());
        assert_eq!(response.tool_calls[0].id, "call_abc");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_chat_maps_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {
                    "message": "Incorrect API key provided",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": "invalid_api_key"
                }
            })))
            .mount(&server)
            .await;

        let err = provider(Some(server.uri()), Some("bad"))
            .chat(&ChatRequest::new(vec![message::user_message("hi")]))
            .await;
        match err {
            Err(e @ AgentError::ApiRequest { .. }) => {
                assert!(e.to_string().contains("Incorrect API key"));
                assert!(!e.is_retryable());
            }
            other => panic!("expected ApiRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried_inside_the_adapter() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {
                    "message": "Rate limit reached for requests",
                    "type": "requests",
                    "param": null,
                    "code": "rate_limit_exceeded"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            provider(Some(server.uri()), Some("sk-test"))
                .chat(&ChatRequest::new(vec![message::user_message("hi")])),
        )
        .await
        .unwrap_or_else(|_| panic!("adapter kept retrying past 5s"));

        match outcome {
            Err(e @ AgentError::ApiRequest { status: Some(429), .. }) => {
                assert!(e.is_retryable());
            }
            other => panic!("expected a 429 ApiRequest, got {other:?}"),
        }
        let hits = server.received_requests().await.map_or(0, |r| r.len());
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_status_hint_from_error_body() {
        assert_eq!(status_hint(Some("requests"), Some("rate_limit_exceeded")), Some(429));
        assert_eq!(status_hint(Some("invalid_request_error"), Some("invalid_api_key")), Some(401));
        assert_eq!(status_hint(Some("server_error"), None), Some(500));
        assert_eq!(status_hint(Some("insufficient_quota"), Some("insufficient_quota")), None);
        assert_eq!(status_hint(None, None), None);
    }
}
