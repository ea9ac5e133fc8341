//! Error types for deskmate.
//!
//! Errors are split by layer: [`AgentError`] for providers, routing and
//! the orchestration loop, [`ToolError`] for local tool execution, and
//! [`CommandError`] for the CLI. [`Error`] aggregates them for callers
//! that do not care which layer failed.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Agent, provider or routing failure.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// Local tool failure.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// CLI command failure.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by completion providers, the router and the orchestrator.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The provider has no credential configured.
    #[error("no API key configured for provider '{provider}'")]
    ApiKeyMissing {
        /// Provider name.
        provider: String,
    },

    /// The remote completion service returned an error.
    #[error("{provider} API error{}: {message}", status_suffix(.status.as_ref()))]
    ApiRequest {
        /// Provider name.
        provider: String,
        /// Error message or response body.
        message: String,
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
    },

    /// The remote service answered with something we could not interpret.
    #[error("invalid response from {provider}: {message}")]
    InvalidResponse {
        /// Provider name.
        provider: String,
        /// What was wrong with it.
        message: String,
    },

    /// A provider name that is not registered with the router.
    #[error("unknown provider: {name}")]
    UnknownProvider {
        /// Requested provider name.
        name: String,
    },

    /// Every candidate provider failed or none is enabled.
    #[error("All AI providers failed{}", attempted_suffix(.attempted))]
    AllProvidersUnavailable {
        /// Providers that were attempted, in order.
        attempted: Vec<String>,
    },

    /// A tool-result batch did not match the pending tool calls.
    #[error("tool results do not match pending tool calls: {message}")]
    HistoryMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// Tool registry failure surfaced at the agent level.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the invalid setting.
        message: String,
    },
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

fn attempted_suffix(attempted: &[String]) -> String {
    if attempted.is_empty() {
        " (none enabled)".to_string()
    } else {
        format!(" (tried: {})", attempted.join(", "))
    }
}

impl AgentError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Uses the HTTP status when one is known and falls back to the
    /// message text otherwise.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiRequest {
                status: Some(status),
                ..
            } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::ApiRequest { message, .. } => {
                crate::agent::retry::is_retryable_message(message)
            }
            _ => false,
        }
    }
}

/// Errors raised while executing or registering a local tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under that name.
    #[error("unknown tool: {name}")]
    UnknownTool {
        /// Requested tool name.
        name: String,
    },

    /// Path falls into the block-list or escapes the project root.
    #[error("Blocked path: {path}")]
    BlockedPath {
        /// Offending path as supplied.
        path: String,
    },

    /// Command prefix is not in the allow-list.
    #[error("Command not allowed: {command}. Allowed: {allowed}")]
    CommandNotAllowed {
        /// Offending command.
        command: String,
        /// Comma-separated allow-list.
        allowed: String,
    },

    /// Payload exceeds the configured byte ceiling.
    #[error("Payload too large: {size} bytes > {limit} bytes")]
    PayloadTooLarge {
        /// Payload size in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// Arguments did not match what the tool expects.
    #[error("invalid arguments for {name}: {message}")]
    InvalidInput {
        /// Tool name.
        name: String,
        /// Parse or validation message.
        message: String,
    },

    /// The handler exceeded its execution timeout and was terminated.
    #[error("{name} timed out after {secs}s")]
    Timeout {
        /// Tool name.
        name: String,
        /// Timeout in seconds.
        secs: u64,
    },

    /// The tool ran but failed; `output` holds whatever it produced.
    #[error("{message}")]
    Failed {
        /// Failure message (stderr, HTTP status, ...).
        message: String,
        /// Partial output produced before the failure.
        output: String,
    },

    /// The handler could not run.
    #[error("{name} failed: {message}")]
    Execution {
        /// Tool name.
        name: String,
        /// Failure message.
        message: String,
    },

    /// Invalid tool registration.
    #[error("tool registration failed: {message}")]
    Registration {
        /// Why registration was refused.
        message: String,
    },
}

impl ToolError {
    /// Output produced before the failure, if any.
    #[must_use]
    pub fn partial_output(&self) -> &str {
        match self {
            Self::Failed { output, .. } => output,
            _ => "",
        }
    }
}

/// Errors raised by CLI commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The command could not complete.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Output could not be rendered.
    #[error("output formatting failed: {0}")]
    OutputFormat(String),

    /// A feature required by the command was not compiled in.
    #[error("feature not enabled: {0}")]
    FeatureDisabled(String),
}
