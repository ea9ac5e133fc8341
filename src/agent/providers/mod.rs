//! Completion provider adapters.
//!
//! One adapter per vendor: [`AnthropicProvider`], [`OpenAiProvider`] (also
//! serving Perplexity), [`GeminiProvider`] and [`OllamaProvider`]. The HTTP
//! adapters share the request and error helpers in this module.

mod anthropic;
mod gemini;
mod ollama;
mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::config::AgentConfig;
use super::message::{ChatMessage, Role};
use super::provider::LlmProvider;
use crate::error::AgentError;

/// Builds every supported provider from configuration, in default fallback order.
///
/// # Errors
///
/// Returns [`AgentError::Config`] if an HTTP client cannot be constructed.
pub fn build_providers(config: &AgentConfig) -> Result<Vec<Arc<dyn LlmProvider>>, AgentError> {
    let timeout = config.request_timeout;
    let providers = &config.providers;
    Ok(vec![
        Arc::new(AnthropicProvider::new(&providers.anthropic, timeout)?),
        Arc::new(OpenAiProvider::openai(&providers.openai, timeout)?),
        Arc::new(OpenAiProvider::perplexity(&providers.perplexity, timeout)?),
        Arc::new(GeminiProvider::new(&providers.gemini, timeout)?),
        Arc::new(OllamaProvider::new(&providers.ollama, timeout)?),
    ])
}

/// Builds a reqwest client with the provider request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, AgentError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| AgentError::Config {
            message: format!("failed to build HTTP client: {e}"),
        })
}

/// Maps a transport failure, keeping the retry classifier's keywords.
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> AgentError {
    let message = if err.is_timeout() {
        format!("request timeout: {err}")
    } else if err.is_connect() {
        format!("network error: {err}")
    } else {
        err.to_string()
    };
    AgentError::ApiRequest {
        provider: provider.to_string(),
        message,
        status: err.status().map(|s| s.as_u16()),
    }
}

/// Sends a request and decodes a JSON body, turning non-2xx replies into
/// [`AgentError::ApiRequest`] with the status attached.
pub(crate) async fn send_json<T: DeserializeOwned>(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, AgentError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(provider, &e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(AgentError::ApiRequest {
            provider: provider.to_string(),
            message: error_message(&body, status.canonical_reason().unwrap_or("error")),
            status: Some(status.as_u16()),
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AgentError::InvalidResponse {
            provider: provider.to_string(),
            message: e.to_string(),
        })
}

/// Extracts a readable message from a vendor error body.
///
/// Understands `{"error": {"message": ..}}`, `{"error": ".."}` and falls back
/// to the raw body.
fn error_message(body: &str, fallback: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(ToString::to_string)
    });
    from_json.unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            fallback.to_string()
        } else {
            trimmed.chars().take(500).collect()
        }
    })
}

/// Parses tool arguments into a JSON object; malformed input becomes `{}`.
pub(crate) fn arguments_object(arguments: &str) -> Value {
    serde_json::from_str::<Value>(arguments)
        .ok()
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
}

/// Merges consecutive turns that map to the same wire role.
///
/// `wire_role` assigns each message its vendor role; turns sharing a role
/// with their predecessor are concatenated into one group.
pub(crate) fn group_by_role<'a, R, F>(
    messages: impl Iterator<Item = &'a ChatMessage>,
    wire_role: F,
) -> Vec<(R, Vec<&'a ChatMessage>)>
where
    R: PartialEq,
    F: Fn(Role) -> R,
{
    let mut groups: Vec<(R, Vec<&ChatMessage>)> = Vec::new();
    for message in messages {
        let role = wire_role(message.role);
        match groups.last_mut() {
            Some((last, members)) if *last == role => members.push(message),
            _ => groups.push((role, vec![message])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{assistant_message, tool_results_message, user_message};

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error":{"message":"bad key","type":"auth"}}"#, "x"),
            "bad key"
        );
        assert_eq!(error_message(r#"{"error":"model not found"}"#, "x"), "model not found");
        assert_eq!(error_message("  ", "Too Many Requests"), "Too Many Requests");
        assert_eq!(error_message("plain failure", "x"), "plain failure");
    }

    #[test]
    fn test_arguments_object() {
        assert_eq!(arguments_object(r#"{"a":1}"#)["a"], 1);
        assert!(arguments_object("not json").as_object().is_some_and(|m| m.is_empty()));
        assert!(arguments_object("[1,2]").as_object().is_some());
    }

    #[test]
    fn test_group_by_role_merges_neighbours() {
        let messages = [
            user_message("a"),
            tool_results_message(Vec::new()),
            assistant_message("b"),
            user_message("c"),
        ];
        let groups = group_by_role(messages.iter(), |role| role == Role::Assistant);
        let sizes: Vec<usize> = groups.iter().map(|(_, m)| m.len()).collect();
        assert_eq!(sizes, vec![2, 1, 1]);
    }

    #[test]
    fn test_build_providers_order() {
        let config = AgentConfig::builder()
            .build()
            .unwrap_or_else(|_| unreachable!());
        let providers = build_providers(&config).unwrap_or_else(|_| unreachable!());
        let names: Vec<&str> = providers.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["anthropic", "openai", "perplexity", "gemini", "ollama"]);
        assert!(providers.iter().all(|p| !p.is_enabled()));
    }
}
