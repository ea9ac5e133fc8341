//! Git tools. Each shells out to the `git` binary in the project directory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ToolContext, ToolHandler, parse_args, process};
use crate::agent::tool::{FieldKind, InputSchema};
use crate::error::ToolError;

const GIT_TIMEOUT: Duration = Duration::from_secs(30);

async fn git(ctx: &ToolContext, tool: &str, args: &[&str]) -> Result<String, ToolError> {
    process::run(tool, "git", args, &ctx.project_dir)
        .await?
        .into_result()
}

/// Parsed `git status --porcelain=v1 --branch`.
#[derive(Debug, Default, PartialEq, Eq)]
struct StatusSummary {
    branch: String,
    modified: Vec<String>,
    created: Vec<String>,
    deleted: Vec<String>,
    staged: Vec<String>,
}

impl StatusSummary {
    fn parse(porcelain: &str) -> Self {
        let mut summary = Self::default();
        for line in porcelain.lines() {
            if let Some(header) = line.strip_prefix("## ") {
                summary.branch = parse_branch(header);
                continue;
            }
            let Some(raw) = line.get(3..).filter(|rest| !rest.is_empty()) else {
                continue;
            };
            let mut codes = line.chars();
            let index = codes.next().unwrap_or(' ');
            let worktree = codes.next().unwrap_or(' ');
            let path = raw
                .rsplit_once(" -> ")
                .map_or(raw, |(_, to)| to)
                .to_string();

            if index == '?' {
                summary.created.push(path);
                continue;
            }
            if index == 'M' || worktree == 'M' {
                summary.modified.push(path.clone());
            }
            if index == 'A' {
                summary.created.push(path.clone());
            }
            if index == 'D' || worktree == 'D' {
                summary.deleted.push(path.clone());
            }
            if index != ' ' {
                summary.staged.push(path);
            }
        }
        summary
    }

    fn render(&self) -> String {
        fn list(items: &[String]) -> String {
            if items.is_empty() {
                "none".to_string()
            } else {
                items.join(", ")
            }
        }
        format!(
            "Branch: {}\nModified: {}\nCreated: {}\nDeleted: {}\nStaged: {}",
            self.branch,
            list(&self.modified),
            list(&self.created),
            list(&self.deleted),
            list(&self.staged)
        )
    }
}

fn parse_branch(header: &str) -> String {
    let header = header
        .strip_prefix("No commits yet on ")
        .or_else(|| header.strip_prefix("Initial commit on "))
        .unwrap_or(header);
    let name = header.split("...").next().unwrap_or(header);
    name.split_whitespace().next().unwrap_or("HEAD").to_string()
}

/// Checks a branch name the way `git check-ref-format` would for common cases.
fn validate_branch_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("branch name cannot be empty".to_string());
    }
    if name.starts_with('-') || name.starts_with('/') || name.ends_with('/') {
        return Err(format!("invalid branch name '{name}'"));
    }
    if name.contains("..") || name.ends_with(".lock") || name.contains("//") {
        return Err(format!("invalid branch name '{name}'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(format!("invalid character in branch name '{name}'"));
    }
    Ok(())
}

/// `git_status`: branch plus modified, created, deleted and staged files.
pub(crate) struct GitStatus {
    ctx: Arc<ToolContext>,
}

impl GitStatus {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl ToolHandler for GitStatus {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Get current git status of the project"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new()
    }

    fn timeout(&self) -> Duration {
        GIT_TIMEOUT
    }

    async fn call(&self, _input: Value) -> Result<String, ToolError> {
        let porcelain = git(&self.ctx, self.name(), &["status", "--porcelain=v1", "--branch"]).await?;
        Ok(StatusSummary::parse(&porcelain).render())
    }
}

/// `git_create_branch`: creates a prefixed branch and switches to it.
pub(crate) struct GitCreateBranch {
    ctx: Arc<ToolContext>,
}

impl GitCreateBranch {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct BranchArgs {
    name: String,
}

#[async_trait]
impl ToolHandler for GitCreateBranch {
    fn name(&self) -> &str {
        "git_create_branch"
    }

    fn description(&self) -> &str {
        "Create a new git branch and switch to it"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required(
            "name",
            FieldKind::String,
            "Branch name (prefix will be added automatically)",
        )
    }

    fn timeout(&self) -> Duration {
        GIT_TIMEOUT
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: BranchArgs = parse_args(self.name(), input)?;
        let branch = format!("{}{}", self.ctx.git_branch_prefix, args.name.trim());
        validate_branch_name(&branch).map_err(|message| ToolError::InvalidInput {
            name: self.name().to_string(),
            message,
        })?;
        git(&self.ctx, self.name(), &["checkout", "-b", &branch]).await?;
        Ok(format!("Created and switched to branch: {branch}"))
    }
}

/// `git_commit`: stages everything and commits.
pub(crate) struct GitCommit {
    ctx: Arc<ToolContext>,
}

impl GitCommit {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct CommitArgs {
    message: String,
}

#[async_trait]
impl ToolHandler for GitCommit {
    fn name(&self) -> &str {
        "git_commit"
    }

    fn description(&self) -> &str {
        "Stage all changes and commit with a message"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required("message", FieldKind::String, "Commit message")
    }

    fn timeout(&self) -> Duration {
        GIT_TIMEOUT
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: CommitArgs = parse_args(self.name(), input)?;
        if args.message.trim().is_empty() {
            return Err(ToolError::InvalidInput {
                name: self.name().to_string(),
                message: "commit message cannot be empty".to_string(),
            });
        }
        git(&self.ctx, self.name(), &["add", "-A"]).await?;
        git(&self.ctx, self.name(), &["commit", "-m", &args.message]).await?;
        let hash = git(&self.ctx, self.name(), &["rev-parse", "--short", "HEAD"]).await?;
        Ok(format!("Committed: {} - {}", hash.trim(), args.message))
    }
}

/// `git_diff`: unstaged changes.
pub(crate) struct GitDiff {
    ctx: Arc<ToolContext>,
}

impl GitDiff {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[async_trait]
impl ToolHandler for GitDiff {
    fn name(&self) -> &str {
        "git_diff"
    }

    fn description(&self) -> &str {
        "Show current unstaged changes"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new()
    }

    fn timeout(&self) -> Duration {
        GIT_TIMEOUT
    }

    async fn call(&self, _input: Value) -> Result<String, ToolError> {
        let diff = git(&self.ctx, self.name(), &["diff"]).await?;
        if diff.trim().is_empty() {
            Ok("No changes".to_string())
        } else {
            Ok(diff)
        }
    }
}
