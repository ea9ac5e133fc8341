//! Tool registry: named handlers, their definitions, and guarded dispatch.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ToolContext, ToolHandler, builtin_tools};
use crate::agent::config::AgentConfig;
use crate::agent::tool::{ToolCall, ToolDefinition};
use crate::error::ToolError;

/// Maximum raw byte length of tool argument JSON from the model.
const MAX_TOOL_ARGS_LEN: usize = 1_000_000;

/// Outcome of a single tool invocation.
///
/// Failures never escape as errors: a refused, failing, timed-out or
/// panicking handler yields `success == false` with `error` set and any
/// partial output in `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolOutput {
    /// Whether the tool completed successfully.
    pub success: bool,
    /// Output text, or partial output on failure.
    pub output: String,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    /// A successful result.
    #[must_use]
    pub const fn ok(output: String) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    /// A failed result carrying the error's partial output.
    #[must_use]
    pub fn failed(error: &ToolError) -> Self {
        Self {
            success: false,
            output: error.partial_output().to_string(),
            error: Some(error.to_string()),
        }
    }
}

struct RegisteredTool {
    handler: Arc<dyn ToolHandler>,
    definition: ToolDefinition,
}

/// Registry of invocable tools, kept in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Registration`] if a built-in fails validation.
    pub fn with_builtin_tools(ctx: &Arc<ToolContext>) -> Result<Self, ToolError> {
        let mut registry = Self::new();
        for handler in builtin_tools(ctx) {
            registry.register(handler)?;
        }
        Ok(registry)
    }

    /// Creates the built-in registry for a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Registration`] if the tool context cannot be built.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ToolError> {
        let ctx = Arc::new(ToolContext::from_config(config)?);
        Self::with_builtin_tools(&ctx)
    }

    /// Registers a handler.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Registration`] if the name is malformed or
    /// already taken, or the schema is invalid.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ToolError> {
        let name = handler.name().to_string();
        if !valid_tool_name(&name) {
            return Err(ToolError::Registration {
                message: format!("invalid tool name '{name}' (expected [a-z0-9_]+)"),
            });
        }
        if self.get(&name).is_some() {
            return Err(ToolError::Registration {
                message: format!("tool '{name}' is already registered"),
            });
        }
        let schema = handler.schema();
        schema.validate().map_err(|message| ToolError::Registration {
            message: format!("tool '{name}': {message}"),
        })?;

        let definition = ToolDefinition {
            name: name.clone(),
            description: handler.description().to_string(),
            parameters: schema.to_json_schema(),
        };
        debug!(tool = %name, "registered tool");
        self.tools.push(RegisteredTool {
            handler,
            definition,
        });
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.iter().find(|t| t.definition.name == name)
    }

    /// Definitions advertised to the model, in registration order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    /// Registered tool names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools
            .iter()
            .map(|t| t.definition.name.as_str())
            .collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Executes a model-issued call, parsing its JSON arguments first.
    pub async fn execute_call(&self, call: &ToolCall) -> ToolOutput {
        if call.arguments.len() > MAX_TOOL_ARGS_LEN {
            return ToolOutput::failed(&ToolError::InvalidInput {
                name: call.name.clone(),
                message: format!(
                    "arguments too large ({} bytes, max {MAX_TOOL_ARGS_LEN})",
                    call.arguments.len()
                ),
            });
        }
        match call.input() {
            Ok(input) => self.execute(&call.name, input).await,
            Err(message) => ToolOutput::failed(&ToolError::InvalidInput {
                name: call.name.clone(),
                message,
            }),
        }
    }

    /// Executes a tool by name.
    ///
    /// The input is checked against the tool's schema, then the handler
    /// runs in its own task under its timeout. A timed-out task is aborted.
    pub async fn execute(&self, name: &str, input: Value) -> ToolOutput {
        let Some(tool) = self.get(name) else {
            warn!(tool = name, "unknown tool requested");
            return ToolOutput::failed(&ToolError::UnknownTool {
                name: name.to_string(),
            });
        };

        if let Err(message) = tool.handler.schema().check_input(&input) {
            return ToolOutput::failed(&ToolError::InvalidInput {
                name: name.to_string(),
                message,
            });
        }

        let limit = tool.handler.timeout();
        let handler = Arc::clone(&tool.handler);
        let started = Instant::now();
        let mut task = tokio::spawn(async move { handler.call(input).await });

        let result = match tokio::time::timeout(limit, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ToolError::Execution {
                name: name.to_string(),
                message: if join_err.is_panic() {
                    "tool panicked".to_string()
                } else {
                    "tool task was cancelled".to_string()
                },
            }),
            Err(_) => {
                task.abort();
                Err(ToolError::Timeout {
                    name: name.to_string(),
                    secs: limit.as_secs(),
                })
            }
        };

        let elapsed_ms = started.elapsed().as_millis();
        match result {
            Ok(output) => {
                info!(tool = name, elapsed_ms, "tool succeeded");
                ToolOutput::ok(output)
            }
            Err(err) => {
                warn!(tool = name, elapsed_ms, error = %err, "tool failed");
                ToolOutput::failed(&err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::tool::{FieldKind, InputSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text back"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new().required("text", FieldKind::String, "Text to echo")
        }
        async fn call(&self, input: Value) -> Result<String, ToolError> {
            Ok(input["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ToolHandler for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Never finishes in time"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new()
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(2)
        }
        async fn call(&self, _input: Value) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("woke".to_string())
        }
    }

    struct Panicky;

    #[async_trait]
    impl ToolHandler for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new()
        }
        async fn call(&self, _input: Value) -> Result<String, ToolError> {
            panic!("handler bug");
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl ToolHandler for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "named"
        }
        fn schema(&self) -> InputSchema {
            InputSchema::new()
        }
        async fn call(&self, _input: Value) -> Result<String, ToolError> {
            Ok(String::new())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(Arc::new(Echo))
            .unwrap_or_else(|e| panic!("register failed: {e}"));
        registry
            .register(Arc::new(Sleepy))
            .unwrap_or_else(|e| panic!("register failed: {e}"));
        registry
            .register(Arc::new(Panicky))
            .unwrap_or_else(|e| panic!("register failed: {e}"));
        registry
    }

    #[tokio::test]
    async fn test_execute_success() {
        let out = registry().execute("echo", json!({"text": "hi"})).await;
        assert_eq!(out, ToolOutput::ok("hi".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let out = registry().execute("teleport", json!({})).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("unknown tool: teleport"));
    }

    #[tokio::test]
    async fn test_schema_violation_never_reaches_handler() {
        let out = registry().execute("echo", json!({"text": 5})).await;
        assert!(!out.success);
        assert!(out.error.unwrap_or_default().contains("must be of type string"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_aborts_handler() {
        let out = registry().execute("sleepy", json!({})).await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("sleepy timed out after 2s"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let registry = registry();
        let out = registry.execute("panicky", json!({})).await;
        assert!(!out.success);
        assert!(out.error.unwrap_or_default().contains("panicked"));

        let after = registry.execute("echo", json!({"text": "still here"})).await;
        assert!(after.success);
    }

    #[tokio::test]
    async fn test_execute_call_rejects_malformed_json() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: "{oops".to_string(),
        };
        let out = registry().execute_call(&call).await;
        assert!(!out.success);
        assert!(out.error.unwrap_or_default().starts_with("invalid arguments for echo"));
    }

    #[test]
    fn test_registration_rules() {
        let mut registry = registry();
        assert!(matches!(
            registry.register(Arc::new(Echo)),
            Err(ToolError::Registration { .. })
        ));
        assert!(registry.register(Arc::new(Named("Bad-Name"))).is_err());
        assert!(registry.register(Arc::new(Named(""))).is_err());
        assert!(registry.register(Arc::new(Named("ok_2"))).is_ok());
        assert_eq!(registry.names(), vec!["echo", "sleepy", "panicky", "ok_2"]);
    }

    #[test]
    fn test_builtin_catalogue() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let config = AgentConfig::builder()
            .project_dir(dir.path())
            .build()
            .unwrap_or_else(|e| panic!("config failed: {e}"));
        let registry = ToolRegistry::from_config(&config)
            .unwrap_or_else(|e| panic!("registry failed: {e}"));
        assert_eq!(
            registry.names(),
            vec![
                "read_file",
                "write_file",
                "search_files",
                "run_command",
                "git_status",
                "git_create_branch",
                "git_commit",
                "git_diff",
                "list_directory",
                "fetch_webpage",
                "search_web",
                "http_request",
                "execute_code",
            ]
        );
        let defs = registry.definitions();
        assert!(defs.iter().all(|d| d.parameters["type"] == "object"));
    }
}
