//! Agent configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.
//! [`AgentConfigBuilder::from_env`] is the only place that reads the process
//! environment; everything downstream receives an [`AgentConfig`].

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::agent::retry::RetryOptions;
use crate::error::AgentError;

/// Default maximum orchestration round-trips per user message.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;
/// Default maximum tokens per completion.
const DEFAULT_MAX_TOKENS: u32 = 8192;
/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;
/// Default write/execute payload ceiling in KB.
const DEFAULT_MAX_FILE_SIZE_KB: usize = 500;
/// Default ceiling on a tool result folded into history.
const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 16_000;
/// Total characters above which a conversation counts as high complexity.
const DEFAULT_HIGH_COMPLEXITY_CHARS: usize = 5000;
/// Total characters above which a conversation counts as medium complexity.
const DEFAULT_MEDIUM_COMPLEXITY_CHARS: usize = 1000;
/// Default branch prefix for `git_create_branch`.
const DEFAULT_GIT_BRANCH_PREFIX: &str = "deskmate/";
/// Default command prefixes `run_command` accepts.
const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "npm test",
    "npm run lint",
    "npm run build",
    "cargo test",
    "cargo check",
    "git status",
    "git diff",
    "git log",
];
/// Default path entries the file tools refuse.
const DEFAULT_BLOCKED_PATHS: &[&str] = &[".env", ".env.local", "node_modules", "dist", ".git"];

/// Default Ollama model.
const DEFAULT_OLLAMA_MODEL: &str = "llama3";

/// A shared, late-bindable secret.
///
/// Clones share the same slot, so a key set after startup (e.g. from a
/// dashboard) is visible to every provider holding a clone.
#[derive(Clone, Default)]
pub struct Credential(Arc<RwLock<Option<String>>>);

impl Credential {
    /// Creates a credential holding `value`.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        let credential = Self::default();
        credential.set(value);
        credential
    }

    /// An empty credential.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Replaces the secret. Blank values clear it.
    pub fn set(&self, value: impl Into<String>) {
        let value = value.into();
        let mut slot = self.0.write().unwrap_or_else(PoisonError::into_inner);
        *slot = if value.trim().is_empty() {
            None
        } else {
            Some(value)
        };
    }

    /// Removes the secret.
    pub fn clear(&self) {
        let mut slot = self.0.write().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
    }

    /// Current secret, if any.
    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a secret is currently present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.is_present() { "<set>" } else { "<unset>" };
        f.debug_tuple("Credential").field(&state).finish()
    }
}

/// Connection settings for one completion provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// API key (may be empty and filled later).
    pub credential: Credential,
    /// Model identifier.
    pub model: String,
    /// Endpoint override.
    pub base_url: Option<String>,
}

impl ProviderSettings {
    fn new(credential: Option<String>, model: Option<String>, default_model: &str) -> Self {
        Self {
            credential: credential.map(Credential::new).unwrap_or_default(),
            model: model.unwrap_or_else(|| default_model.to_string()),
            base_url: None,
        }
    }
}

/// Settings for every supported provider.
#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    /// Anthropic Messages API.
    pub anthropic: ProviderSettings,
    /// `OpenAI` chat completions.
    pub openai: ProviderSettings,
    /// Perplexity (OpenAI-compatible).
    pub perplexity: ProviderSettings,
    /// Google Gemini.
    pub gemini: ProviderSettings,
    /// Local Ollama; enabled when `base_url` is set.
    pub ollama: ProviderSettings,
}

/// Complexity thresholds and preferred providers for the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Total characters above which a request is high complexity.
    pub high_complexity_chars: usize,
    /// Total characters above which a request is medium complexity.
    pub medium_complexity_chars: usize,
    /// Preferred provider for low-complexity requests.
    pub cheap_provider: String,
    /// Preferred provider for high-complexity requests.
    pub strong_provider: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            high_complexity_chars: DEFAULT_HIGH_COMPLEXITY_CHARS,
            medium_complexity_chars: DEFAULT_MEDIUM_COMPLEXITY_CHARS,
            cheap_provider: "perplexity".to_string(),
            strong_provider: "anthropic".to_string(),
        }
    }
}

/// Tool guardrails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailConfig {
    /// Path entries the file tools refuse.
    pub blocked_paths: Vec<String>,
    /// Command prefixes `run_command` accepts.
    pub allowed_commands: Vec<String>,
    /// Ceiling on `write_file` content and `execute_code` source, in bytes.
    pub max_write_bytes: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            blocked_paths: to_strings(DEFAULT_BLOCKED_PATHS),
            allowed_commands: to_strings(DEFAULT_ALLOWED_COMMANDS),
            max_write_bytes: DEFAULT_MAX_FILE_SIZE_KB * 1024,
        }
    }
}

/// Configuration for the agent system.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Root directory the tools operate in.
    pub project_dir: PathBuf,
    /// Per-provider connection settings.
    pub providers: ProvidersConfig,
    /// Explicit fallback order; `None` means registration order.
    pub fallback_chain: Option<Vec<String>>,
    /// Router heuristics.
    pub routing: RoutingConfig,
    /// Maximum round-trips per user message.
    pub max_iterations: usize,
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Backoff applied per provider call.
    pub retry: RetryOptions,
    /// Tool guardrails.
    pub guardrails: GuardrailConfig,
    /// Prefix added to branches created by `git_create_branch`.
    pub git_branch_prefix: String,
    /// Ceiling on a tool result folded into history, in characters.
    pub max_tool_output_chars: usize,
    /// Execute the tool calls of one turn concurrently.
    pub parallel_tools: bool,
    /// Timeout for provider HTTP requests.
    pub request_timeout: Duration,
    /// Optional file replacing the built-in system prompt.
    pub prompt_file: Option<PathBuf>,
}

impl AgentConfig {
    /// Creates a new builder for `AgentConfig`.
    #[must_use]
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if a value is out of range.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`AgentConfig`].
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    project_dir: Option<PathBuf>,
    anthropic_api_key: Option<String>,
    anthropic_model: Option<String>,
    openai_api_key: Option<String>,
    openai_model: Option<String>,
    openai_base_url: Option<String>,
    perplexity_api_key: Option<String>,
    perplexity_model: Option<String>,
    gemini_api_key: Option<String>,
    gemini_model: Option<String>,
    ollama_base_url: Option<String>,
    ollama_model: Option<String>,
    fallback_chain: Option<Vec<String>>,
    routing: Option<RoutingConfig>,
    max_iterations: Option<usize>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    retry_max_delay: Option<Duration>,
    retry_jitter: Option<bool>,
    blocked_paths: Option<Vec<String>>,
    allowed_commands: Option<Vec<String>>,
    max_file_size_kb: Option<usize>,
    git_branch_prefix: Option<String>,
    max_tool_output_chars: Option<usize>,
    parallel_tools: Option<bool>,
    timeout: Option<Duration>,
    prompt_file: Option<PathBuf>,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    env_string(name).map(|v| split_list(&v))
}

/// Splits a comma-separated list, trimming entries and dropping blanks.
#[must_use]
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl AgentConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(mut self) -> Self {
        fn fill<T>(slot: &mut Option<T>, value: impl FnOnce() -> Option<T>) {
            if slot.is_none() {
                *slot = value();
            }
        }

        fill(&mut self.project_dir, || {
            env_string("PROJECT_DIR").map(PathBuf::from)
        });
        fill(&mut self.anthropic_api_key, || env_string("ANTHROPIC_API_KEY"));
        fill(&mut self.anthropic_model, || env_string("ANTHROPIC_MODEL"));
        fill(&mut self.openai_api_key, || env_string("OPENAI_API_KEY"));
        fill(&mut self.openai_model, || env_string("OPENAI_MODEL"));
        fill(&mut self.openai_base_url, || env_string("OPENAI_BASE_URL"));
        fill(&mut self.perplexity_api_key, || {
            env_string("PERPLEXITY_API_KEY")
        });
        fill(&mut self.perplexity_model, || env_string("PERPLEXITY_MODEL"));
        fill(&mut self.gemini_api_key, || env_string("GEMINI_API_KEY"));
        fill(&mut self.gemini_model, || env_string("GEMINI_MODEL"));
        fill(&mut self.ollama_base_url, || env_string("OLLAMA_BASE_URL"));
        fill(&mut self.ollama_model, || env_string("OLLAMA_MODEL"));
        fill(&mut self.fallback_chain, || {
            env_list("DESKMATE_FALLBACK_CHAIN")
        });
        fill(&mut self.max_iterations, || {
            env_parse("DESKMATE_MAX_ITERATIONS")
        });
        fill(&mut self.max_retries, || env_parse("DESKMATE_MAX_RETRIES"));
        fill(&mut self.retry_base_delay, || {
            env_parse("DESKMATE_RETRY_BASE_MS").map(Duration::from_millis)
        });
        fill(&mut self.retry_max_delay, || {
            env_parse("DESKMATE_RETRY_MAX_MS").map(Duration::from_millis)
        });
        fill(&mut self.blocked_paths, || env_list("BLOCKED_PATHS"));
        fill(&mut self.allowed_commands, || env_list("ALLOWED_COMMANDS"));
        fill(&mut self.max_file_size_kb, || env_parse("MAX_FILE_SIZE_KB"));
        fill(&mut self.git_branch_prefix, || env_string("GIT_BRANCH_PREFIX"));
        fill(&mut self.prompt_file, || {
            env_string("DESKMATE_PROMPT_FILE").map(PathBuf::from)
        });
        self
    }

    /// Sets the project directory.
    #[must_use]
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = Some(dir.into());
        self
    }

    /// Sets the Anthropic API key.
    #[must_use]
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.anthropic_api_key = Some(key.into());
        self
    }

    /// Sets the Anthropic model.
    #[must_use]
    pub fn anthropic_model(mut self, model: impl Into<String>) -> Self {
        self.anthropic_model = Some(model.into());
        self
    }

    /// Sets the `OpenAI` API key.
    #[must_use]
    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Sets the `OpenAI` model.
    #[must_use]
    pub fn openai_model(mut self, model: impl Into<String>) -> Self {
        self.openai_model = Some(model.into());
        self
    }

    /// Sets the `OpenAI` base URL override.
    #[must_use]
    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.openai_base_url = Some(url.into());
        self
    }

    /// Sets the Perplexity API key.
    #[must_use]
    pub fn perplexity_api_key(mut self, key: impl Into<String>) -> Self {
        self.perplexity_api_key = Some(key.into());
        self
    }

    /// Sets the Gemini API key.
    #[must_use]
    pub fn gemini_api_key(mut self, key: impl Into<String>) -> Self {
        self.gemini_api_key = Some(key.into());
        self
    }

    /// Sets the Ollama endpoint, enabling the provider.
    #[must_use]
    pub fn ollama_base_url(mut self, url: impl Into<String>) -> Self {
        self.ollama_base_url = Some(url.into());
        self
    }

    /// Sets the Ollama model.
    #[must_use]
    pub fn ollama_model(mut self, model: impl Into<String>) -> Self {
        self.ollama_model = Some(model.into());
        self
    }

    /// Sets an explicit fallback chain.
    #[must_use]
    pub fn fallback_chain<I, S>(mut self, chain: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_chain = Some(chain.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the router heuristics.
    #[must_use]
    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Sets the maximum orchestration round-trips.
    #[must_use]
    pub const fn max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Sets the completion max tokens.
    #[must_use]
    pub const fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the max retries.
    #[must_use]
    pub const fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Sets the delay before the first retry.
    #[must_use]
    pub const fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Sets the retry delay ceiling.
    #[must_use]
    pub const fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.retry_max_delay = Some(delay);
        self
    }

    /// Enables or disables retry jitter.
    #[must_use]
    pub const fn retry_jitter(mut self, jitter: bool) -> Self {
        self.retry_jitter = Some(jitter);
        self
    }

    /// Sets the blocked path entries.
    #[must_use]
    pub fn blocked_paths(mut self, paths: Vec<String>) -> Self {
        self.blocked_paths = Some(paths);
        self
    }

    /// Sets the allowed command prefixes.
    #[must_use]
    pub fn allowed_commands(mut self, commands: Vec<String>) -> Self {
        self.allowed_commands = Some(commands);
        self
    }

    /// Sets the write payload ceiling in KB.
    #[must_use]
    pub const fn max_file_size_kb(mut self, kb: usize) -> Self {
        self.max_file_size_kb = Some(kb);
        self
    }

    /// Sets the git branch prefix.
    #[must_use]
    pub fn git_branch_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.git_branch_prefix = Some(prefix.into());
        self
    }

    /// Sets the tool output ceiling in characters.
    #[must_use]
    pub const fn max_tool_output_chars(mut self, n: usize) -> Self {
        self.max_tool_output_chars = Some(n);
        self
    }

    /// Runs the tool calls of one turn concurrently (`true`) or in order.
    #[must_use]
    pub const fn parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = Some(parallel);
        self
    }

    /// Sets the provider request timeout.
    #[must_use]
    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Sets the system prompt file.
    #[must_use]
    pub fn prompt_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.prompt_file = Some(path.into());
        self
    }

    /// Builds the [`AgentConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Config`] if `max_iterations` is zero or the
    /// retry base delay exceeds the maximum delay.
    pub fn build(self) -> Result<AgentConfig, AgentError> {
        let max_iterations = self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS);
        if max_iterations == 0 {
            return Err(AgentError::Config {
                message: "max_iterations must be at least 1".to_string(),
            });
        }

        let defaults = RetryOptions::default();
        let retry = RetryOptions {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            base_delay: self.retry_base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.retry_max_delay.unwrap_or(defaults.max_delay),
            jitter: self.retry_jitter.unwrap_or(defaults.jitter),
        };
        if retry.base_delay > retry.max_delay {
            return Err(AgentError::Config {
                message: format!(
                    "retry base delay ({}ms) exceeds max delay ({}ms)",
                    retry.base_delay.as_millis(),
                    retry.max_delay.as_millis()
                ),
            });
        }

        let routing = self.routing.unwrap_or_default();
        if routing.medium_complexity_chars > routing.high_complexity_chars {
            return Err(AgentError::Config {
                message: "medium complexity threshold exceeds high threshold".to_string(),
            });
        }

        let mut openai =
            ProviderSettings::new(self.openai_api_key, self.openai_model, "gpt-4o-mini");
        openai.base_url = self.openai_base_url;

        let mut ollama = ProviderSettings::new(None, self.ollama_model, DEFAULT_OLLAMA_MODEL);
        ollama.base_url = self.ollama_base_url;

        let providers = ProvidersConfig {
            anthropic: ProviderSettings::new(
                self.anthropic_api_key,
                self.anthropic_model,
                "claude-sonnet-4-20250514",
            ),
            openai,
            perplexity: ProviderSettings::new(
                self.perplexity_api_key,
                self.perplexity_model,
                "sonar",
            ),
            gemini: ProviderSettings::new(
                self.gemini_api_key,
                self.gemini_model,
                "gemini-2.0-flash",
            ),
            ollama,
        };

        let guardrails = GuardrailConfig {
            blocked_paths: self
                .blocked_paths
                .unwrap_or_else(|| to_strings(DEFAULT_BLOCKED_PATHS)),
            allowed_commands: self
                .allowed_commands
                .unwrap_or_else(|| to_strings(DEFAULT_ALLOWED_COMMANDS)),
            max_write_bytes: self
                .max_file_size_kb
                .unwrap_or(DEFAULT_MAX_FILE_SIZE_KB)
                .saturating_mul(1024),
        };

        Ok(AgentConfig {
            project_dir: self.project_dir.unwrap_or_else(|| PathBuf::from(".")),
            providers,
            fallback_chain: self.fallback_chain,
            routing,
            max_iterations,
            max_tokens: self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: self.temperature,
            retry,
            guardrails,
            git_branch_prefix: self
                .git_branch_prefix
                .unwrap_or_else(|| DEFAULT_GIT_BRANCH_PREFIX.to_string()),
            max_tool_output_chars: self
                .max_tool_output_chars
                .unwrap_or(DEFAULT_MAX_TOOL_OUTPUT_CHARS),
            parallel_tools: self.parallel_tools.unwrap_or(true),
            request_timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            prompt_file: self.prompt_file,
        })
    }
}
