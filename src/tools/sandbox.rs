//! `execute_code`: runs a snippet through a language interpreter.
//!
//! The snippet is written to a temporary file that is removed when the
//! call finishes. The interpreter runs in the system temp directory, not
//! the project.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ToolContext, ToolHandler, parse_args, process, truncate_chars};
use crate::agent::tool::{FieldKind, InputSchema};
use crate::error::ToolError;

const SANDBOX_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_OUTPUT_CHARS: usize = 5000;
const MAX_ERROR_CHARS: usize = 2000;

/// Interpreter invocation for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interpreter {
    program: &'static str,
    leading_args: &'static [&'static str],
    extension: &'static str,
}

fn interpreter_for(language: &str) -> Option<Interpreter> {
    let interpreter = match language.trim().to_ascii_lowercase().as_str() {
        "javascript" | "js" => Interpreter {
            program: "node",
            leading_args: &[],
            extension: ".mjs",
        },
        "typescript" | "ts" => Interpreter {
            program: "npx",
            leading_args: &["tsx"],
            extension: ".ts",
        },
        "python" | "py" => Interpreter {
            program: "python3",
            leading_args: &[],
            extension: ".py",
        },
        "bash" | "sh" => Interpreter {
            program: "bash",
            leading_args: &[],
            extension: ".sh",
        },
        _ => return None,
    };
    Some(interpreter)
}

pub(crate) struct ExecuteCode {
    ctx: Arc<ToolContext>,
}

impl ExecuteCode {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
    language: Option<String>,
}

#[async_trait]
impl ToolHandler for ExecuteCode {
    fn name(&self) -> &str {
        "execute_code"
    }

    fn description(&self) -> &str {
        "Execute code in a sandboxed environment. Supports javascript, typescript, python, bash"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new()
            .required("code", FieldKind::String, "Code to execute")
            .optional(
                "language",
                FieldKind::String,
                "Language: javascript, typescript, python, bash (default javascript)",
            )
    }

    fn timeout(&self) -> Duration {
        SANDBOX_TIMEOUT
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: CodeArgs = parse_args(self.name(), input)?;
        let language = args.language.as_deref().unwrap_or("javascript");
        let interpreter = interpreter_for(language).ok_or_else(|| ToolError::InvalidInput {
            name: self.name().to_string(),
            message: format!(
                "Unsupported language: {language}. Supported: javascript, typescript, python, bash"
            ),
        })?;
        self.ctx.guardrails.check_payload(args.code.len())?;

        let io_err = |e: std::io::Error| ToolError::Execution {
            name: self.name().to_string(),
            message: format!("failed to stage snippet: {e}"),
        };
        let mut script = tempfile::Builder::new()
            .prefix("deskmate-sandbox-")
            .suffix(interpreter.extension)
            .tempfile()
            .map_err(io_err)?;
        script.write_all(args.code.as_bytes()).map_err(io_err)?;
        script.flush().map_err(io_err)?;

        let script_path = script.path().to_string_lossy().into_owned();
        let mut argv: Vec<&str> = interpreter.leading_args.to_vec();
        argv.push(&script_path);
        let work_dir = std::env::temp_dir();

        let output = process::run(self.name(), interpreter.program, &argv, &work_dir).await?;
        drop(script);

        if output.success {
            Ok(truncate_chars(&output.stdout, MAX_OUTPUT_CHARS))
        } else {
            let message = if output.stderr.trim().is_empty() {
                output.code.map_or_else(
                    || "process terminated by signal".to_string(),
                    |code| format!("process exited with status {code}"),
                )
            } else {
                truncate_chars(output.stderr.trim_end(), MAX_ERROR_CHARS)
            };
            Err(ToolError::Failed {
                message,
                output: truncate_chars(&output.stdout, MAX_ERROR_CHARS),
            })
        }
    }
}
