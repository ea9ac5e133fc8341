//! Model router: complexity-based provider selection with fallback.
//!
//! Each request is classified as low, medium or high complexity. Low
//! complexity prefers the cheap provider, high complexity the strong one,
//! and everything else starts at the head of the fallback chain. Each
//! candidate is tried through the retry executor; on failure the router
//! moves to the next enabled provider in the chain.

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::{Instant, SystemTime};

use futures_util::future::join_all;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::{AgentConfig, RoutingConfig};
use super::events::{AgentEvent, EventBus};
use super::ledger::{CostLedger, CostRecord};
use super::message::{ChatMessage, ChatRequest, ChatResponse};
use super::provider::LlmProvider;
use super::providers::build_providers;
use super::retry::{RetryOptions, with_retry_if};
use crate::error::AgentError;

/// Code markers in the latest message.
static CODE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"```|\bfunction |\bclass |\bimport |\bconst |\blet |\bfn |\bdef ").ok()
});

/// Analysis keywords in the latest message.
static ANALYSIS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"analy[sz]e|explain|compare|summari[sz]e|review").ok());

/// Coarse difficulty classification of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    /// Short, conversational.
    Low,
    /// Moderately long.
    Medium,
    /// Long, code-bearing or analytical.
    High,
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

/// Outcome of a routed call.
#[derive(Debug, Clone)]
pub struct RoutingResult {
    /// Provider that answered.
    pub provider: String,
    /// Model it used.
    pub model: String,
    /// The provider's answer.
    pub response: ChatResponse,
    /// Time from the first attempt to the answer, retries included.
    pub latency: std::time::Duration,
    /// Estimated cost in US dollars.
    pub estimated_cost: f64,
}

/// One provider's answer in a side-by-side comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    /// Provider that answered.
    pub provider: String,
    /// Model it used.
    pub model: String,
    /// Answer text.
    pub content: String,
    /// Latency in milliseconds, retries included.
    pub latency_ms: u64,
    /// Estimated cost in US dollars.
    pub estimated_cost: f64,
}

impl From<&RoutingResult> for Comparison {
    fn from(result: &RoutingResult) -> Self {
        Self {
            provider: result.provider.clone(),
            model: result.model.clone(),
            content: result.response.content.clone(),
            latency_ms: u64::try_from(result.latency.as_millis()).unwrap_or(u64::MAX),
            estimated_cost: result.estimated_cost,
        }
    }
}

/// Snapshot of one registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Configured model.
    pub model: String,
    /// Whether it can currently be called.
    pub enabled: bool,
    /// Whether it accepts tool definitions.
    pub supports_tools: bool,
    /// Position in the fallback chain, if present.
    pub chain_position: Option<usize>,
}

/// Routes chat requests across registered providers.
pub struct ModelRouter {
    providers: Vec<Arc<dyn LlmProvider>>,
    fallback_chain: Vec<String>,
    explicit_chain: bool,
    routing: RoutingConfig,
    retry: RetryOptions,
    ledger: Arc<CostLedger>,
    events: EventBus,
}

impl fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.providers.iter().map(|p| p.name()).collect();
        f.debug_struct("ModelRouter")
            .field("providers", &names)
            .field("fallback_chain", &self.fallback_chain)
            .field("routing", &self.routing)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Approximate token count: one token per four characters, rounded up.
#[must_use]
pub const fn approximate_tokens(chars: usize) -> usize {
    chars.div_ceil(4)
}

impl ModelRouter {
    /// Creates a router with no providers.
    #[must_use]
    pub fn new(routing: RoutingConfig, retry: RetryOptions) -> Self {
        Self {
            providers: Vec::new(),
            fallback_chain: Vec::new(),
            explicit_chain: false,
            routing,
            retry,
            ledger: Arc::new(CostLedger::new()),
            events: EventBus::new(),
        }
    }

    /// Creates a router with every built-in provider registered.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if a provider cannot be constructed.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let mut router = Self::new(config.routing.clone(), config.retry.clone());
        for provider in build_providers(config)? {
            router.register(provider);
        }
        if let Some(chain) = &config.fallback_chain {
            router.set_fallback_chain(chain);
        }
        Ok(router)
    }

    /// Publishes router events on `events` instead of a private bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Records costs in a shared ledger.
    #[must_use]
    pub fn with_ledger(mut self, ledger: Arc<CostLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    /// Registers a provider, replacing any provider of the same name.
    ///
    /// Unless an explicit chain was set, the provider is appended to the
    /// fallback chain.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let name = provider.name().to_string();
        if let Some(slot) = self.providers.iter_mut().find(|p| p.name() == name) {
            *slot = provider;
            return;
        }
        self.providers.push(provider);
        if !self.explicit_chain {
            self.fallback_chain.push(name);
        }
    }

    /// Replaces the fallback chain. Unknown and duplicate names are dropped.
    pub fn set_fallback_chain<S: AsRef<str>>(&mut self, chain: &[S]) {
        let mut resolved: Vec<String> = Vec::new();
        for name in chain {
            let name = name.as_ref();
            if self.provider(name).is_none() {
                warn!(provider = name, "ignoring unknown provider in fallback chain");
                continue;
            }
            if !resolved.iter().any(|n| n == name) {
                resolved.push(name.to_string());
            }
        }
        self.fallback_chain = resolved;
        self.explicit_chain = true;
    }

    /// Current fallback chain.
    #[must_use]
    pub fn fallback_chain(&self) -> &[String] {
        &self.fallback_chain
    }

    /// Looks up a registered provider.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<&Arc<dyn LlmProvider>> {
        self.providers.iter().find(|p| p.name() == name)
    }

    /// Shared cost ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    /// Event bus the router publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Status of every registered provider, in registration order.
    #[must_use]
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.providers
            .iter()
            .map(|p| ProviderStatus {
                name: p.name().to_string(),
                model: p.model().to_string(),
                enabled: p.is_enabled(),
                supports_tools: p.supports_tools(),
                chain_position: self.fallback_chain.iter().position(|n| n == p.name()),
            })
            .collect()
    }

    /// Whether any registered provider is currently enabled.
    #[must_use]
    pub fn has_enabled_provider(&self) -> bool {
        self.providers.iter().any(|p| p.is_enabled())
    }

    /// Classifies a request.
    ///
    /// Length is measured over every message, system prompt included; the
    /// code and analysis patterns look at the latest conversation message.
    #[must_use]
    pub fn estimate_complexity(&self, request: &ChatRequest) -> Complexity {
        let total: usize = request.messages.iter().map(ChatMessage::char_len).sum();
        let last = request
            .conversation()
            .last()
            .map_or("", |m| m.content.as_str());

        let has_code = CODE_PATTERN.as_ref().is_some_and(|re| re.is_match(last));
        let analytical = ANALYSIS_PATTERN
            .as_ref()
            .is_some_and(|re| re.is_match(&last.to_lowercase()));

        if total > self.routing.high_complexity_chars || has_code || analytical {
            Complexity::High
        } else if total > self.routing.medium_complexity_chars {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }

    /// Enabled providers in the order they should be tried.
    fn candidates(&self, complexity: Complexity) -> Vec<Arc<dyn LlmProvider>> {
        let enabled = |name: &str| self.provider(name).filter(|p| p.is_enabled()).cloned();

        let preferred = match complexity {
            Complexity::Low => enabled(&self.routing.cheap_provider),
            Complexity::High => enabled(&self.routing.strong_provider),
            Complexity::Medium => None,
        };

        let mut candidates: Vec<Arc<dyn LlmProvider>> = preferred.into_iter().collect();
        for name in &self.fallback_chain {
            if candidates.iter().any(|c| c.name() == name) {
                continue;
            }
            if let Some(provider) = enabled(name) {
                candidates.push(provider);
            }
        }
        candidates
    }

    /// Routes a request to the best available provider, falling back on failure.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::AllProvidersUnavailable`] when no provider is
    /// enabled or every candidate failed.
    pub async fn route(&self, request: &ChatRequest) -> Result<RoutingResult, AgentError> {
        let complexity = self.estimate_complexity(request);
        let candidates = self.candidates(complexity);
        debug!(
            %complexity,
            candidates = ?candidates.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "routing request"
        );
        self.try_candidates(candidates, request).await
    }

    /// Routes a request to one named provider, bypassing selection.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownProvider`] for unregistered names and
    /// [`AgentError::AllProvidersUnavailable`] if the provider is disabled
    /// or fails.
    pub async fn route_via(
        &self,
        name: &str,
        request: &ChatRequest,
    ) -> Result<RoutingResult, AgentError> {
        let provider = self
            .provider(name)
            .ok_or_else(|| AgentError::UnknownProvider {
                name: name.to_string(),
            })?;
        let candidates = if provider.is_enabled() {
            vec![Arc::clone(provider)]
        } else {
            Vec::new()
        };
        self.try_candidates(candidates, request).await
    }

    /// Sends the same request to several providers concurrently.
    ///
    /// With no names every registered provider is asked. Unknown, disabled
    /// and failing providers are left out of the result, which keeps the
    /// order of `names`.
    pub async fn compare<S: AsRef<str>>(
        &self,
        request: &ChatRequest,
        names: &[S],
    ) -> Vec<RoutingResult> {
        let mut targets: Vec<&str> = if names.is_empty() {
            self.providers.iter().map(|p| p.name()).collect()
        } else {
            names.iter().map(AsRef::as_ref).collect()
        };
        let mut seen = std::collections::HashSet::new();
        targets.retain(|name| seen.insert(*name));

        let outcomes = join_all(targets.iter().map(|name| self.route_via(name, request))).await;
        targets
            .iter()
            .zip(outcomes)
            .filter_map(|(name, outcome)| match outcome {
                Ok(result) => Some(result),
                Err(err) => {
                    debug!(provider = %name, error = %err, "left out of comparison");
                    None
                }
            })
            .collect()
    }

    async fn try_candidates(
        &self,
        candidates: Vec<Arc<dyn LlmProvider>>,
        request: &ChatRequest,
    ) -> Result<RoutingResult, AgentError> {
        let mut attempted = Vec::with_capacity(candidates.len());

        for provider in candidates {
            let name = provider.name().to_string();
            attempted.push(name.clone());

            let start = Instant::now();
            let outcome = with_retry_if(
                || provider.chat(request),
                &self.retry,
                AgentError::is_retryable,
            )
            .await;

            match outcome {
                Ok(response) => {
                    let latency = start.elapsed();
                    let input_tokens: usize = request
                        .messages
                        .iter()
                        .map(|m| approximate_tokens(m.char_len()))
                        .sum();
                    let output_chars = response.content.chars().count()
                        + response
                            .tool_calls
                            .iter()
                            .map(|c| c.name.len() + c.arguments.len())
                            .sum::<usize>();
                    let output_tokens = output_chars / 4;
                    let cost = provider.estimate_cost(input_tokens, output_tokens);
                    let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

                    self.ledger.record(CostRecord {
                        provider: name.clone(),
                        model: provider.model().to_string(),
                        input_tokens,
                        output_tokens,
                        cost,
                        latency,
                        timestamp: SystemTime::now(),
                    });
                    self.events.emit(AgentEvent::Routed {
                        provider: name.clone(),
                        latency_ms,
                        cost,
                    });
                    info!(
                        provider = %name,
                        latency_ms,
                        cost,
                        tool_calls = response.tool_calls.len(),
                        "provider answered"
                    );

                    return Ok(RoutingResult {
                        provider: name,
                        model: provider.model().to_string(),
                        response,
                        latency,
                        estimated_cost: cost,
                    });
                }
                Err(err) => {
                    warn!(provider = %name, error = %err, "provider failed, falling back");
                    self.events.emit(AgentEvent::Fallback {
                        from: name,
                        error: err.to_string(),
                    });
                }
            }
        }

        Err(AgentError::AllProvidersUnavailable { attempted })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::message::{system_message, user_message};
    use crate::agent::testing::ScriptedProvider;
    use std::time::Duration;
    use test_case::test_case;

    fn fast_retry() -> RetryOptions {
        RetryOptions {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            jitter: false,
        }
    }

    fn router_with(providers: &[Arc<ScriptedProvider>]) -> ModelRouter {
        let mut router = ModelRouter::new(RoutingConfig::default(), fast_retry());
        for p in providers {
            router.register(Arc::clone(p) as Arc<dyn LlmProvider>);
        }
        router
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new(vec![system_message("sys"), user_message(text)])
    }

    #[test_case("hi there", Complexity::Low ; "short chat")]
    #[test_case("Please explain how this works", Complexity::High ; "analysis keyword")]
    #[test_case("SUMMARIZE the thread", Complexity::High ; "keyword is case insensitive")]
    #[test_case("```rust\nfn main() {}\n```", Complexity::High ; "fenced code")]
    #[test_case("const x = 1;", Complexity::High ; "js declaration")]
    #[test_case("def handler(event):", Complexity::High ; "python def")]
    fn test_complexity_by_content(text: &str, expected: Complexity) {
        let router = router_with(&[]);
        assert_eq!(router.estimate_complexity(&request(text)), expected);
    }

    #[test]
    fn test_complexity_by_length() {
        let router = router_with(&[]);
        // "sys" adds three characters to every request.
        assert_eq!(
            router.estimate_complexity(&request(&"a".repeat(998))),
            Complexity::Medium
        );
        assert_eq!(
            router.estimate_complexity(&request(&"a".repeat(4998))),
            Complexity::High
        );
        assert_eq!(
            router.estimate_complexity(&request(&"a".repeat(997))),
            Complexity::Low
        );
    }

    #[test]
    fn test_system_prompt_counts_toward_length() {
        let router = router_with(&[]);
        let long_prompt = ChatRequest::new(vec![
            system_message(&"p".repeat(1200)),
            user_message("hi"),
        ]);
        assert_eq!(router.estimate_complexity(&long_prompt), Complexity::Medium);
        let bare = ChatRequest::new(vec![user_message("hi")]);
        assert_eq!(router.estimate_complexity(&bare), Complexity::Low);
    }

    #[test]
    fn test_patterns_only_check_last_message() {
        let router = router_with(&[]);
        let req = ChatRequest::new(vec![
            user_message("explain closures"),
            crate::agent::message::assistant_message("Sure."),
            user_message("thanks"),
        ]);
        assert_eq!(router.estimate_complexity(&req), Complexity::Low);
    }

    #[tokio::test]
    async fn test_low_complexity_prefers_cheap_provider() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let perplexity = Arc::new(ScriptedProvider::new("perplexity"));
        perplexity.push_text("cheap answer");
        let router = router_with(&[Arc::clone(&anthropic), Arc::clone(&perplexity)]);

        let result = router
            .route(&request("hello"))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        assert_eq!(result.provider, "perplexity");
        assert_eq!(result.response.content, "cheap answer");
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn test_high_complexity_prefers_strong_provider() {
        let openai = Arc::new(ScriptedProvider::new("openai"));
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        anthropic.push_text("deep answer");
        let router = router_with(&[Arc::clone(&openai), Arc::clone(&anthropic)]);

        let result = router
            .route(&request("review this diff"))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        assert_eq!(result.provider, "anthropic");
        assert_eq!(openai.calls(), 0);
    }

    #[tokio::test]
    async fn test_medium_uses_chain_head() {
        let openai = Arc::new(ScriptedProvider::new("openai"));
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        openai.push_text("chain head");
        let router = router_with(&[Arc::clone(&openai), Arc::clone(&anthropic)]);

        let result = router
            .route(&request(&"x".repeat(2000)))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        assert_eq!(result.provider, "openai");
    }

    #[tokio::test]
    async fn test_disabled_preferred_is_skipped() {
        let perplexity = Arc::new(ScriptedProvider::disabled("perplexity"));
        let openai = Arc::new(ScriptedProvider::new("openai"));
        openai.push_text("fallback answer");
        let router = router_with(&[Arc::clone(&perplexity), Arc::clone(&openai)]);

        let result = router
            .route(&request("hi"))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        assert_eq!(result.provider, "openai");
        assert_eq!(perplexity.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_after_exhausted_retries() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let openai = Arc::new(ScriptedProvider::new("openai"));
        for _ in 0..3 {
            anthropic.push_error("rate limit exceeded", Some(429));
        }
        openai.push_text("second opinion");
        let router = router_with(&[Arc::clone(&anthropic), Arc::clone(&openai)]);
        let mut events = router.events().subscribe();

        let result = router
            .route(&request("explain monads"))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        assert_eq!(result.provider, "openai");
        assert_eq!(anthropic.calls(), 3);

        let first = events.recv().await.ok();
        assert!(matches!(first, Some(AgentEvent::Fallback { ref from, .. }) if from == "anthropic"));
        let second = events.recv().await.ok();
        assert!(matches!(second, Some(AgentEvent::Routed { ref provider, .. }) if provider == "openai"));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        anthropic.push_error("invalid x-api-key", Some(401));
        let router = router_with(&[Arc::clone(&anthropic)]);

        let err = router.route(&request("explain")).await;
        assert_eq!(anthropic.calls(), 1);
        match err {
            Err(AgentError::AllProvidersUnavailable { attempted }) => {
                assert_eq!(attempted, vec!["anthropic".to_string()]);
            }
            other => panic!("expected AllProvidersUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_enabled_provider_fails_without_calls() {
        let anthropic = Arc::new(ScriptedProvider::disabled("anthropic"));
        let router = router_with(&[Arc::clone(&anthropic)]);
        let err = router.route(&request("hi")).await;
        assert!(matches!(
            err,
            Err(AgentError::AllProvidersUnavailable { ref attempted }) if attempted.is_empty()
        ));
        assert_eq!(anthropic.calls(), 0);
    }

    #[tokio::test]
    async fn test_success_records_cost() {
        let openai = Arc::new(ScriptedProvider::new("openai"));
        openai.push_text("abcd");
        let router = router_with(&[Arc::clone(&openai)]);

        let result = router
            .route(&request("12345678"))
            .await
            .unwrap_or_else(|e| panic!("route failed: {e}"));
        // "sys" -> 1 token, "12345678" -> 2 tokens; "abcd" -> 1 token
        let expected = 3.0 * 1e-6 + 1.0 * 2e-6;
        assert!((result.estimated_cost - expected).abs() < 1e-12);
        assert_eq!(router.ledger().len(), 1);
        assert!((router.ledger().cost_by_provider()["openai"] - expected).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_route_via_pins_provider() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let openai = Arc::new(ScriptedProvider::disabled("openai"));
        anthropic.push_text("pinned");
        let router = router_with(&[Arc::clone(&anthropic), Arc::clone(&openai)]);

        let ok = router
            .route_via("anthropic", &request("hi"))
            .await
            .unwrap_or_else(|e| panic!("route_via failed: {e}"));
        assert_eq!(ok.provider, "anthropic");

        let disabled = router.route_via("openai", &request("hi")).await;
        assert!(matches!(disabled, Err(AgentError::AllProvidersUnavailable { .. })));

        let unknown = router.route_via("mistral", &request("hi")).await;
        assert!(matches!(unknown, Err(AgentError::UnknownProvider { .. })));
    }

    #[tokio::test]
    async fn test_compare_collects_every_answer() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let openai = Arc::new(ScriptedProvider::new("openai"));
        let gemini = Arc::new(ScriptedProvider::disabled("gemini"));
        let ollama = Arc::new(ScriptedProvider::new("ollama"));
        anthropic.push_text("from anthropic");
        openai.push_error("invalid key", Some(401));
        ollama.push_text("from ollama");
        let router = router_with(&[
            Arc::clone(&anthropic),
            Arc::clone(&openai),
            Arc::clone(&gemini),
            Arc::clone(&ollama),
        ]);

        let results = router.compare(&request("hi"), &[] as &[&str]).await;
        let answered: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.provider.as_str(), r.response.content.as_str()))
            .collect();
        assert_eq!(
            answered,
            vec![("anthropic", "from anthropic"), ("ollama", "from ollama")]
        );
        assert_eq!(gemini.calls(), 0);
        assert_eq!(router.ledger().len(), 2);

        let summary = Comparison::from(&results[1]);
        assert_eq!(summary.provider, "ollama");
        assert_eq!(summary.content, "from ollama");
    }

    #[tokio::test]
    async fn test_compare_named_subset_keeps_order() {
        let anthropic = Arc::new(ScriptedProvider::new("anthropic"));
        let openai = Arc::new(ScriptedProvider::new("openai"));
        anthropic.push_text("a");
        openai.push_text("o");
        let router = router_with(&[Arc::clone(&anthropic), Arc::clone(&openai)]);

        let results = router
            .compare(&request("hi"), &["openai", "mistral", "openai", "anthropic"])
            .await;
        let names: Vec<&str> = results.iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(names, vec!["openai", "anthropic"]);
        assert_eq!(openai.calls(), 1);
    }

    #[test]
    fn test_set_fallback_chain_drops_unknown_names() {
        let a = Arc::new(ScriptedProvider::new("anthropic"));
        let o = Arc::new(ScriptedProvider::new("openai"));
        let mut router = router_with(&[a, o]);
        assert_eq!(router.fallback_chain(), ["anthropic", "openai"]);

        router.set_fallback_chain(&["openai", "mistral", "openai"]);
        assert_eq!(router.fallback_chain(), ["openai"]);

        let statuses = router.provider_statuses();
        assert_eq!(statuses[0].chain_position, None);
        assert_eq!(statuses[1].chain_position, Some(0));
    }

    #[test]
    fn test_late_enable_is_observed() {
        let openai = Arc::new(ScriptedProvider::disabled("openai"));
        let router = router_with(&[Arc::clone(&openai)]);
        assert!(!router.has_enabled_provider());
        openai.set_enabled(true);
        assert!(router.has_enabled_provider());
        assert!(router.provider_statuses()[0].enabled);
    }

    #[test]
    fn test_approximate_tokens_rounds_up() {
        assert_eq!(approximate_tokens(0), 0);
        assert_eq!(approximate_tokens(1), 1);
        assert_eq!(approximate_tokens(8), 2);
        assert_eq!(approximate_tokens(9), 3);
    }
}
