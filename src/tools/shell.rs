//! `run_command`: allow-listed shell commands in the project directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ToolContext, ToolHandler, parse_args, process};
use crate::agent::tool::{FieldKind, InputSchema};
use crate::error::ToolError;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct RunCommand {
    ctx: Arc<ToolContext>,
}

impl RunCommand {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

#[async_trait]
impl ToolHandler for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowed shell command in the project directory"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required(
            "command",
            FieldKind::String,
            "Command to run (must start with an allowed prefix)",
        )
    }

    fn timeout(&self) -> Duration {
        COMMAND_TIMEOUT
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: CommandArgs = parse_args(self.name(), input)?;
        self.ctx.guardrails.check_command(&args.command)?;
        process::run(
            self.name(),
            "sh",
            &["-c", args.command.trim()],
            &self.ctx.project_dir,
        )
        .await?
        .into_result()
    }
}
