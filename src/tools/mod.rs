//! Local tools the model can invoke.
//!
//! Each tool is a [`ToolHandler`] registered with the [`ToolRegistry`].
//! Handlers share a [`ToolContext`] carrying the project root, the
//! [`Guardrails`] and an HTTP client. The registry runs every call in its
//! own task under the handler's timeout.

pub mod guardrails;
mod registry;

mod fs;
mod git;
mod process;
mod sandbox;
mod shell;
mod web;

pub use guardrails::Guardrails;
pub use registry::{ToolOutput, ToolRegistry};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::config::AgentConfig;
use crate::agent::tool::InputSchema;
use crate::error::ToolError;

/// Timeout applied to handlers that do not declare their own.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// A single invocable tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique name (`[a-z0-9_]+`).
    fn name(&self) -> &str;

    /// Description advertised to the model.
    fn description(&self) -> &str;

    /// Declared input fields.
    fn schema(&self) -> InputSchema;

    /// Maximum run time before the call is aborted.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Runs the tool. `input` has already been checked against [`Self::schema`].
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the tool is refused or fails.
    async fn call(&self, input: Value) -> Result<String, ToolError>;
}

/// State shared by the built-in tools.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Directory tools operate in.
    pub project_dir: PathBuf,
    /// Path, command and payload policy.
    pub guardrails: Guardrails,
    /// Client for the web tools.
    pub http: reqwest::Client,
    /// Prefix for branches created by `git_create_branch`.
    pub git_branch_prefix: String,
}

impl ToolContext {
    /// Builds the context from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Registration`] if the HTTP client cannot be built.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ToolError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("deskmate/", env!("CARGO_PKG_VERSION")))
            .redirect(web::redirect_policy())
            .build()
            .map_err(|e| ToolError::Registration {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            project_dir: config.project_dir.clone(),
            guardrails: Guardrails::new(&config.project_dir, &config.guardrails),
            http,
            git_branch_prefix: config.git_branch_prefix.clone(),
        })
    }
}

/// Every built-in tool, in catalogue order.
#[must_use]
pub fn builtin_tools(ctx: &Arc<ToolContext>) -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(fs::ReadFile::new(ctx)),
        Arc::new(fs::WriteFile::new(ctx)),
        Arc::new(fs::SearchFiles::new(ctx)),
        Arc::new(shell::RunCommand::new(ctx)),
        Arc::new(git::GitStatus::new(ctx)),
        Arc::new(git::GitCreateBranch::new(ctx)),
        Arc::new(git::GitCommit::new(ctx)),
        Arc::new(git::GitDiff::new(ctx)),
        Arc::new(fs::ListDirectory::new(ctx)),
        Arc::new(web::FetchWebpage::new(ctx)),
        Arc::new(web::SearchWeb::new(ctx)),
        Arc::new(web::HttpRequest::new(ctx)),
        Arc::new(sandbox::ExecuteCode::new(ctx)),
    ]
}

/// Deserializes a handler's input into its argument struct.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput {
        name: tool.to_string(),
        message: e.to_string(),
    })
}

/// Truncates to at most `max` characters.
pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
