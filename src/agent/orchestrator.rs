//! Agent orchestrator: the per-conversation tool-calling loop.
//!
//! ```text
//! chat(message)
//!   ├── busy? → BUSY_MESSAGE
//!   ├── append user turn
//!   └── up to max_iterations:
//!       ├── Router → provider answer
//!       ├── final text → append, done
//!       └── tool calls → append request turn
//!                      → ToolRegistry (concurrently or in order)
//!                      → append the whole result batch as one turn
//! ```
//!
//! Nothing escapes [`Orchestrator::chat`]: failures become an
//! `Error: <message>` answer and the busy flag clears on every path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::config::{AgentConfig, DEFAULT_MAX_ITERATIONS};
use super::conversation::Conversation;
use super::events::AgentEvent;
use super::message::{ChatMessage, ChatRequest, system_message, user_message};
use super::prompt::load_system_prompt;
use super::router::{Comparison, ModelRouter, RoutingResult};
use super::tool::{ToolCall, ToolResult};
use crate::error::AgentError;
use crate::tools::ToolRegistry;

/// Answer returned while another turn is in flight.
pub const BUSY_MESSAGE: &str = "I'm already working on something. Please wait.";

/// Suffix appended when the iteration cap ends a turn.
pub const ITERATION_LIMIT_NOTICE: &str =
    "\n\n(Reached maximum iteration limit. Some work may be incomplete.)";

/// Per-orchestrator loop settings.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// System prompt sent first on every round-trip.
    pub system_prompt: String,
    /// Maximum provider round-trips per turn.
    pub max_iterations: usize,
    /// Maximum tokens per completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Run the calls of one model turn concurrently.
    pub parallel_tools: bool,
    /// Ceiling on a single tool result fed back to the model.
    pub max_tool_output_chars: usize,
    /// Pin every round-trip to this provider instead of routing.
    pub provider: Option<String>,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: None,
            temperature: None,
            parallel_tools: true,
            max_tool_output_chars: 16_000,
            provider: None,
        }
    }
}

impl OrchestratorSettings {
    /// Settings from configuration, with the system prompt resolved.
    #[must_use]
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            system_prompt: load_system_prompt(config.prompt_file.as_deref(), &config.project_dir),
            max_iterations: config.max_iterations,
            max_tokens: Some(config.max_tokens),
            temperature: config.temperature,
            parallel_tools: config.parallel_tools,
            max_tool_output_chars: config.max_tool_output_chars,
            provider: None,
        }
    }
}

/// Clears the busy flag when dropped.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns one conversation and drives it through the router and tools.
pub struct Orchestrator {
    router: Arc<ModelRouter>,
    tools: Arc<ToolRegistry>,
    settings: OrchestratorSettings,
    conversation: Mutex<Conversation>,
    busy: AtomicBool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("settings", &self.settings)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over a shared router and tool registry.
    #[must_use]
    pub fn new(
        router: Arc<ModelRouter>,
        tools: Arc<ToolRegistry>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            router,
            tools,
            settings,
            conversation: Mutex::new(Conversation::new()),
            busy: AtomicBool::new(false),
        }
    }

    /// Builds the router, the built-in tools and the settings from config.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if a provider or the tool context cannot be built.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let router = Arc::new(ModelRouter::from_config(config)?);
        let tools = Arc::new(ToolRegistry::from_config(config)?);
        Ok(Self::new(
            router,
            tools,
            OrchestratorSettings::from_config(config),
        ))
    }

    /// Pins every round-trip to one provider.
    #[must_use]
    pub fn with_provider(mut self, provider: Option<String>) -> Self {
        self.settings.provider = provider;
        self
    }

    fn history_lock(&self) -> MutexGuard<'_, Conversation> {
        self.conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one user turn to completion and returns the answer text.
    ///
    /// Returns [`BUSY_MESSAGE`] without touching history if a turn is
    /// already in flight. Failures are reported as `Error: <message>`.
    pub async fn chat(&self, message: &str) -> String {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("chat rejected: turn already in flight");
            return BUSY_MESSAGE.to_string();
        };

        self.history_lock().push_user(message);

        let events = self.router.events();
        match self.run_loop().await {
            Ok(answer) => {
                events.emit(AgentEvent::Done);
                answer
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                events.emit(AgentEvent::Error {
                    message: err.to_string(),
                });
                format!("Error: {err}")
            }
        }
    }

    async fn run_loop(&self) -> Result<String, AgentError> {
        let events = self.router.events();
        let mut last_text = String::new();

        for step in 1..=self.settings.max_iterations {
            events.emit(AgentEvent::Thinking { step });
            let routed = self.round_trip().await?;
            let response = routed.response;
            debug!(
                step,
                provider = %routed.provider,
                tool_calls = response.tool_calls.len(),
                "round-trip complete"
            );

            if !response.requests_tools() {
                self.history_lock().push_assistant(&response.content);
                info!(step, provider = %routed.provider, "turn answered");
                return Ok(response.content);
            }

            if !response.content.trim().is_empty() {
                last_text.clone_from(&response.content);
            }
            let calls = self
                .history_lock()
                .push_tool_calls(&response.content, response.tool_calls);

            let results = self.run_tools(&calls).await;
            {
                let mut history = self.history_lock();
                if let Err(err) = history.push_tool_results(results) {
                    history.discard_pending();
                    return Err(err);
                }
            }
        }

        warn!(
            max_iterations = self.settings.max_iterations,
            "iteration limit reached"
        );
        Ok(format!("{last_text}{ITERATION_LIMIT_NOTICE}")
            .trim_start()
            .to_string())
    }

    async fn round_trip(&self) -> Result<RoutingResult, AgentError> {
        let mut messages: Vec<ChatMessage> = Vec::new();
        if !self.settings.system_prompt.is_empty() {
            messages.push(system_message(&self.settings.system_prompt));
        }
        messages.extend(self.history_lock().messages().iter().cloned());

        let mut request = ChatRequest::new(messages).with_tools(self.tools.definitions());
        request.max_tokens = self.settings.max_tokens;
        request.temperature = self.settings.temperature;

        match &self.settings.provider {
            Some(name) => self.router.route_via(name, &request).await,
            None => self.router.route(&request).await,
        }
    }

    async fn run_tools(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.settings.parallel_tools {
            join_all(calls.iter().map(|call| self.run_tool(call))).await
        } else {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.run_tool(call).await);
            }
            results
        }
    }

    async fn run_tool(&self, call: &ToolCall) -> ToolResult {
        let events = self.router.events();
        events.emit(AgentEvent::ToolCall {
            name: call.name.clone(),
            input: call.input().unwrap_or(Value::Null),
        });

        let output = self.tools.execute_call(call).await;
        events.emit(AgentEvent::ToolResult {
            name: call.name.clone(),
            success: output.success,
        });

        let content = if output.success {
            output.output
        } else {
            let error = output.error.unwrap_or_default();
            if output.output.trim().is_empty() {
                format!("ERROR: {error}")
            } else {
                format!("ERROR: {error}\n\n{}", output.output)
            }
        };

        ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            content: crate::tools::truncate_chars(&content, self.settings.max_tool_output_chars),
            is_error: !output.success,
        }
    }

    /// Asks several providers the same one-off question.
    ///
    /// Sends the system prompt and `message` without history or tools and
    /// leaves the conversation untouched. An empty `providers` asks every
    /// registered provider.
    pub async fn compare(&self, message: &str, providers: &[String]) -> Vec<Comparison> {
        let mut messages = Vec::with_capacity(2);
        if !self.settings.system_prompt.is_empty() {
            messages.push(system_message(&self.settings.system_prompt));
        }
        messages.push(user_message(message));
        let mut request = ChatRequest::new(messages);
        request.max_tokens = self.settings.max_tokens;
        request.temperature = self.settings.temperature;

        self.router
            .compare(&request, providers)
            .await
            .iter()
            .map(Comparison::from)
            .collect()
    }

    /// Empties the conversation.
    pub fn clear_history(&self) {
        self.history_lock().clear();
    }

    /// User turns and plain assistant answers.
    #[must_use]
    pub fn history(&self) -> Vec<ChatMessage> {
        self.history_lock().visible()
    }

    /// Every turn, tool traffic included.
    #[must_use]
    pub fn full_history(&self) -> Vec<ChatMessage> {
        self.history_lock().messages().to_vec()
    }

    /// Whether a turn is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Subscribes to progress events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.router.events().subscribe()
    }

    /// The shared router.
    #[must_use]
    pub const fn router(&self) -> &Arc<ModelRouter> {
        &self.router
    }

    /// The shared tool registry.
    #[must_use]
    pub const fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Loop settings.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::config::RoutingConfig;
    use crate::agent::message::{ChatResponse, Role};
    use crate::agent::provider::LlmProvider;
    use crate::agent::retry::RetryOptions;
    use crate::agent::testing::ScriptedProvider;
    use crate::agent::tool::{FieldKind, InputSchema};
    use crate::error::ToolError;
    use crate::tools::ToolHandler;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl ToolHandler for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase the text"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new().required("text", FieldKind::String, "Text")
        }
        async fn call(&self, input: Value) -> Result<String, ToolError> {
            Ok(input["text"].as_str().unwrap_or_default().to_uppercase())
        }
    }

    fn router_with(provider: &Arc<ScriptedProvider>) -> Arc<ModelRouter> {
        let mut router = ModelRouter::new(RoutingConfig::default(), RetryOptions::none());
        router.register(Arc::clone(provider) as Arc<dyn LlmProvider>);
        Arc::new(router)
    }

    fn tools() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Upper))
            .unwrap_or_else(|e| panic!("register failed: {e}"));
        Arc::new(registry)
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: "You are a test assistant.".to_string(),
            ..OrchestratorSettings::default()
        }
    }

    fn orchestrator(provider: &Arc<ScriptedProvider>) -> Orchestrator {
        Orchestrator::new(router_with(provider), tools(), settings())
    }

    #[tokio::test]
    async fn test_plain_answer_adds_two_turns() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider.push_text("Hi! How can I help?");
        let agent = orchestrator(&provider);

        let answer = agent.chat("Hello").await;
        assert_eq!(answer, "Hi! How can I help?");
        assert_eq!(provider.calls(), 1);
        assert_eq!(agent.full_history().len(), 2);
        assert!(!agent.is_busy());

        let sent = &provider.requests()[0];
        assert_eq!(sent.system_prompt(), Some("You are a test assistant."));
        assert_eq!(sent.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_results_fed_back_as_one_turn() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[
                ("call_a", "upper", r#"{"text":"one"}"#),
                ("call_b", "upper", r#"{"text":"two"}"#),
            ])
            .push_text("ONE and TWO");
        let agent = orchestrator(&provider);

        let answer = agent.chat("shout these").await;
        assert_eq!(answer, "ONE and TWO");

        let second = &provider.requests()[1];
        let results_turn = second
            .messages
            .last()
            .unwrap_or_else(|| panic!("no messages"));
        assert_eq!(results_turn.role, Role::Tool);
        let ids: Vec<&str> = results_turn
            .tool_results
            .iter()
            .map(|r| r.tool_call_id.as_str())
            .collect();
        assert_eq!(ids, vec!["call_a", "call_b"]);
        assert_eq!(results_turn.tool_results[0].content, "ONE");
        assert_eq!(results_turn.tool_results[1].content, "TWO");

        // user, tool request, results, answer
        assert_eq!(agent.full_history().len(), 4);
        assert_eq!(agent.history().len(), 2);
    }

    #[tokio::test]
    async fn test_sequential_tools_keep_call_order() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[
                ("c1", "upper", r#"{"text":"a"}"#),
                ("c2", "upper", r#"{"text":"b"}"#),
            ])
            .push_text("done");
        let agent = Orchestrator::new(
            router_with(&provider),
            tools(),
            OrchestratorSettings {
                parallel_tools: false,
                ..settings()
            },
        );
        assert_eq!(agent.chat("go").await, "done");
        let contents: Vec<String> = provider.requests()[1]
            .messages
            .last()
            .map(|m| m.tool_results.iter().map(|r| r.content.clone()).collect())
            .unwrap_or_default();
        assert_eq!(contents, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_tool_failure_is_fed_back_and_loop_continues() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[("call_1", "teleport", "{}")])
            .push_text("That tool does not exist.");
        let agent = orchestrator(&provider);

        let answer = agent.chat("beam me up").await;
        assert_eq!(answer, "That tool does not exist.");

        let fed_back = provider.requests()[1]
            .messages
            .last()
            .map(|m| m.tool_results[0].clone())
            .unwrap_or_else(|| panic!("no results turn"));
        assert!(fed_back.is_error);
        assert_eq!(fed_back.content, "ERROR: unknown tool: teleport");
    }

    #[tokio::test]
    async fn test_blocked_path_read_is_reported_to_model() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap_or_else(|_| unreachable!());
        let config = AgentConfig::builder()
            .project_dir(dir.path())
            .build()
            .unwrap_or_else(|e| panic!("config failed: {e}"));
        let registry = Arc::new(
            ToolRegistry::from_config(&config).unwrap_or_else(|e| panic!("tools failed: {e}")),
        );

        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[("call_1", "read_file", r#"{"file_path":".env"}"#)])
            .push_text("I can't read that file.");
        let agent = Orchestrator::new(router_with(&provider), registry, settings());

        assert_eq!(agent.chat("show me .env").await, "I can't read that file.");
        let fed_back = provider.requests()[1]
            .messages
            .last()
            .map(|m| m.tool_results[0].content.clone())
            .unwrap_or_default();
        assert!(fed_back.starts_with("ERROR: Blocked path"));
        assert!(!fed_back.contains("SECRET"));
    }

    #[tokio::test]
    async fn test_iteration_cap_returns_partial_answer() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        for i in 0..5 {
            provider.push(Ok(ChatResponse::tool_use(
                "still working",
                vec![ToolCall {
                    id: format!("call_{i}"),
                    name: "upper".to_string(),
                    arguments: r#"{"text":"x"}"#.to_string(),
                }],
            )));
        }
        let agent = Orchestrator::new(
            router_with(&provider),
            tools(),
            OrchestratorSettings {
                max_iterations: 3,
                ..settings()
            },
        );

        let answer = agent.chat("loop forever").await;
        assert_eq!(answer, format!("still working{ITERATION_LIMIT_NOTICE}"));
        assert_eq!(provider.calls(), 3);
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn test_no_enabled_provider_becomes_error_text() {
        let provider = Arc::new(ScriptedProvider::disabled("primary"));
        let agent = orchestrator(&provider);
        let mut events = agent.subscribe();

        let answer = agent.chat("Hello").await;
        assert_eq!(answer, "Error: All AI providers failed (none enabled)");
        assert!(!agent.is_busy());
        assert_eq!(provider.calls(), 0);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(kinds, vec!["thinking", "error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_chat_gets_busy_message() {
        let provider =
            Arc::new(ScriptedProvider::new("primary").with_delay(Duration::from_secs(5)));
        provider.push_text("first answer");
        let agent = orchestrator(&provider);

        let (first, second) = tokio::join!(agent.chat("one"), agent.chat("two"));
        assert_eq!(first, "first answer");
        assert_eq!(second, BUSY_MESSAGE);
        assert_eq!(agent.full_history().len(), 2);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_events_for_tool_turn() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[("c1", "upper", r#"{"text":"a"}"#)])
            .push_text("ok");
        let agent = orchestrator(&provider);
        let mut events = agent.subscribe();

        agent.chat("go").await;
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec![
                "thinking",
                "routed",
                "tool_call",
                "tool_result",
                "thinking",
                "routed",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn test_calls_without_ids_are_still_answered() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider
            .push_tool_calls(&[
                ("", "upper", r#"{"text":"one"}"#),
                ("", "upper", r#"{"text":"two"}"#),
            ])
            .push_text("done");
        let agent = orchestrator(&provider);

        assert_eq!(agent.chat("shout").await, "done");

        let history = agent.full_history();
        assert_eq!(history.len(), 4);
        let call_ids: Vec<&str> = history[1].tool_calls.iter().map(|c| c.id.as_str()).collect();
        let result_ids: Vec<&str> = history[2]
            .tool_results
            .iter()
            .map(|r| r.tool_call_id.as_str())
            .collect();
        assert_eq!(call_ids.len(), 2);
        assert_ne!(call_ids[0], call_ids[1]);
        assert!(call_ids.iter().all(|id| !id.is_empty()));
        assert_eq!(call_ids, result_ids);

        // A follow-up turn sees a well-formed history.
        provider.push_text("again");
        assert_eq!(agent.chat("more").await, "again");
    }

    struct Slow;

    #[async_trait]
    impl ToolHandler for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "Takes a while"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new()
        }
        async fn call(&self, _input: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("finished".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_mid_turn_leaves_no_unanswered_calls() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider.push_tool_calls(&[("c1", "slow", "{}")]);
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Slow))
            .unwrap_or_else(|e| panic!("register failed: {e}"));
        let agent = Orchestrator::new(router_with(&provider), Arc::new(registry), settings());

        let (answer, ()) = tokio::join!(agent.chat("wait"), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            agent.clear_history();
        });
        assert!(answer.starts_with("Error:"), "{answer}");
        assert!(
            agent
                .full_history()
                .iter()
                .all(|turn| turn.tool_calls.is_empty())
        );
        assert!(!agent.is_busy());
    }

    #[tokio::test]
    async fn test_clear_history_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::new("primary"));
        provider.push_text("hello");
        let agent = orchestrator(&provider);
        agent.chat("hi").await;

        agent.clear_history();
        assert!(agent.full_history().is_empty());
        agent.clear_history();
        assert!(agent.full_history().is_empty());
    }

    #[tokio::test]
    async fn test_compare_leaves_history_alone() {
        let first = Arc::new(ScriptedProvider::new("first"));
        let second = Arc::new(ScriptedProvider::new("second"));
        first.push_text("one view");
        second.push_text("another view");
        let mut router = ModelRouter::new(RoutingConfig::default(), RetryOptions::none());
        router.register(Arc::clone(&first) as Arc<dyn LlmProvider>);
        router.register(Arc::clone(&second) as Arc<dyn LlmProvider>);
        let agent = Orchestrator::new(Arc::new(router), tools(), settings());

        let answers = agent.compare("Which is better?", &[]).await;
        let contents: Vec<&str> = answers.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["one view", "another view"]);
        assert!(agent.full_history().is_empty());

        let sent = &first.requests()[0];
        assert_eq!(sent.messages.len(), 2);
        assert!(sent.tools.is_empty());
    }

    #[tokio::test]
    async fn test_pinned_provider_bypasses_routing() {
        let primary = Arc::new(ScriptedProvider::new("primary"));
        let pinned = Arc::new(ScriptedProvider::new("pinned"));
        pinned.push_text("from pinned");
        let mut router = ModelRouter::new(RoutingConfig::default(), RetryOptions::none());
        router.register(Arc::clone(&primary) as Arc<dyn LlmProvider>);
        router.register(Arc::clone(&pinned) as Arc<dyn LlmProvider>);

        let agent = Orchestrator::new(Arc::new(router), tools(), settings())
            .with_provider(Some("pinned".to_string()));
        assert_eq!(agent.chat("hi").await, "from pinned");
        assert_eq!(primary.calls(), 0);
    }
}
