//! File tools: `read_file`, `write_file`, `search_files`, `list_directory`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{ToolContext, ToolHandler, parse_args};
use crate::agent::tool::{FieldKind, InputSchema};
use crate::error::ToolError;

/// Maximum paths returned by `search_files`.
const MAX_SEARCH_RESULTS: usize = 200;

fn io_error(tool: &str, path: &str, err: &std::io::Error) -> ToolError {
    ToolError::Execution {
        name: tool.to_string(),
        message: format!("{path}: {err}"),
    }
}

/// Reads a UTF-8 file under the project root.
pub(crate) struct ReadFile {
    ctx: Arc<ToolContext>,
}

impl ReadFile {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct PathArgs {
    file_path: String,
}

#[async_trait]
impl ToolHandler for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required(
            "file_path",
            FieldKind::String,
            "Path to the file relative to project root",
        )
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: PathArgs = parse_args(self.name(), input)?;
        let path = self.ctx.guardrails.resolve_path(&args.file_path)?;
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(self.name(), &args.file_path, &e))
    }
}

/// Writes a file, creating parent directories.
pub(crate) struct WriteFile {
    ctx: Arc<ToolContext>,
}

impl WriteFile {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct WriteArgs {
    file_path: String,
    content: String,
}

#[async_trait]
impl ToolHandler for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating directories as needed"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new()
            .required(
                "file_path",
                FieldKind::String,
                "Path to the file relative to project root",
            )
            .required("content", FieldKind::String, "Full file content to write")
    }

    #[allow(clippy::cast_precision_loss)]
    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: WriteArgs = parse_args(self.name(), input)?;
        let path = self.ctx.guardrails.resolve_path(&args.file_path)?;
        let size = args.content.len();
        self.ctx.guardrails.check_payload(size)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(self.name(), &args.file_path, &e))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| io_error(self.name(), &args.file_path, &e))?;

        Ok(format!(
            "Wrote {} ({:.1}KB)",
            args.file_path,
            size as f64 / 1024.0
        ))
    }
}

/// Finds files by glob pattern.
pub(crate) struct SearchFiles {
    ctx: Arc<ToolContext>,
}

impl SearchFiles {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
}

#[async_trait]
impl ToolHandler for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search for files matching a glob pattern"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().required("pattern", FieldKind::String, "Glob pattern like **/*.rs")
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: SearchArgs = parse_args(self.name(), input)?;
        let pattern = args.pattern.trim().to_string();
        if Path::new(&pattern).is_absolute() || pattern.split('/').any(|part| part == "..") {
            return Err(ToolError::BlockedPath { path: pattern });
        }

        let ctx = Arc::clone(&self.ctx);
        let name = self.name().to_string();
        let matches = tokio::task::spawn_blocking(move || glob_under_root(&ctx, &pattern))
            .await
            .map_err(|e| ToolError::Execution {
                name: name.clone(),
                message: e.to_string(),
            })?
            .map_err(|message| ToolError::InvalidInput { name, message })?;

        if matches.is_empty() {
            return Ok("No matching files".to_string());
        }
        let total = matches.len();
        let mut listing: Vec<String> = matches.into_iter().take(MAX_SEARCH_RESULTS).collect();
        if total > MAX_SEARCH_RESULTS {
            listing.push(format!("... ({} more)", total - MAX_SEARCH_RESULTS));
        }
        Ok(listing.join("\n"))
    }
}

/// Expands `pattern` under the project root, dropping blocked paths.
fn glob_under_root(ctx: &ToolContext, pattern: &str) -> Result<Vec<String>, String> {
    let root = ctx.guardrails.root();
    let full = format!(
        "{}/{}",
        glob::Pattern::escape(&root.to_string_lossy()).trim_end_matches('/'),
        pattern
    );
    let paths = glob::glob(&full).map_err(|e| format!("invalid glob pattern: {e}"))?;

    let mut found: Vec<String> = paths
        .filter_map(Result::ok)
        .filter_map(|p| p.strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|rel| !ctx.guardrails.is_blocked(rel))
        .map(|rel| rel.to_string_lossy().into_owned())
        .collect();
    found.sort();
    Ok(found)
}

/// Lists a directory as `[DIR]`/`[FILE]` lines.
pub(crate) struct ListDirectory {
    ctx: Arc<ToolContext>,
}

impl ListDirectory {
    pub fn new(ctx: &Arc<ToolContext>) -> Self {
        Self {
            ctx: Arc::clone(ctx),
        }
    }
}

#[derive(Deserialize)]
struct ListArgs {
    dir_path: Option<String>,
}

#[async_trait]
impl ToolHandler for ListDirectory {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and folders in a directory"
    }

    fn schema(&self) -> InputSchema {
        InputSchema::new().optional(
            "dir_path",
            FieldKind::String,
            "Directory path relative to project root",
        )
    }

    async fn call(&self, input: Value) -> Result<String, ToolError> {
        let args: ListArgs = parse_args(self.name(), input)?;
        let dir_path = args.dir_path.unwrap_or_else(|| ".".to_string());
        let path = self.ctx.guardrails.resolve_path(&dir_path)?;

        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error(self.name(), &dir_path, &e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(self.name(), &dir_path, &e))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            entries.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
        }
        entries.sort();

        if entries.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| format!("{} {name}", if is_dir { "[DIR]" } else { "[FILE]" }))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::agent::config::GuardrailConfig;
    use crate::tools::Guardrails;
    use serde_json::json;

    fn context(root: &Path) -> Arc<ToolContext> {
        Arc::new(ToolContext {
            project_dir: root.to_path_buf(),
            guardrails: Guardrails::new(
                root,
                &GuardrailConfig {
                    max_write_bytes: 64,
                    ..GuardrailConfig::default()
                },
            ),
            http: reqwest::Client::new(),
            git_branch_prefix: "deskmate/".to_string(),
        })
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let ctx = context(dir.path());

        let wrote = WriteFile::new(&ctx)
            .call(json!({"file_path": "notes/today.md", "content": "hello"}))
            .await
            .unwrap_or_else(|e| panic!("write failed: {e}"));
        assert_eq!(wrote, "Wrote notes/today.md (0.0KB)");

        let read = ReadFile::new(&ctx)
            .call(json!({"file_path": "notes/today.md"}))
            .await
            .unwrap_or_else(|e| panic!("read failed: {e}"));
        assert_eq!(read, "hello");
    }

    #[tokio::test]
    async fn test_blocked_read_never_touches_disk() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let ctx = context(dir.path());
        let err = ReadFile::new(&ctx)
            .call(json!({"file_path": ".env"}))
            .await;
        assert!(matches!(err, Err(ToolError::BlockedPath { .. })));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let ctx = context(dir.path());
        let err = WriteFile::new(&ctx)
            .call(json!({"file_path": "big.txt", "content": "x".repeat(65)}))
            .await;
        assert!(matches!(err, Err(ToolError::PayloadTooLarge { .. })));
        assert!(!dir.path().join("big.txt").exists());
    }

    #[tokio::test]
    async fn test_search_files_filters_blocked() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap_or_else(|_| unreachable!());
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap_or_else(|_| unreachable!());
        std::fs::write(root.join("src/lib.rs"), "").unwrap_or_else(|_| unreachable!());
        std::fs::write(root.join("node_modules/pkg/lib.rs"), "").unwrap_or_else(|_| unreachable!());

        let ctx = context(root);
        let found = SearchFiles::new(&ctx)
            .call(json!({"pattern": "**/*.rs"}))
            .await
            .unwrap_or_else(|e| panic!("search failed: {e}"));
        assert_eq!(found, "src/lib.rs");

        let none = SearchFiles::new(&ctx)
            .call(json!({"pattern": "*.py"}))
            .await
            .unwrap_or_else(|e| panic!("search failed: {e}"));
        assert_eq!(none, "No matching files");

        let escape = SearchFiles::new(&ctx)
            .call(json!({"pattern": "../**/*"}))
            .await;
        assert!(matches!(escape, Err(ToolError::BlockedPath { .. })));
    }

    #[tokio::test]
    async fn test_list_directory_marks_kinds() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap_or_else(|_| unreachable!());
        std::fs::write(root.join("Cargo.toml"), "").unwrap_or_else(|_| unreachable!());

        let listing = ListDirectory::new(&context(root))
            .call(json!({}))
            .await
            .unwrap_or_else(|e| panic!("list failed: {e}"));
        assert_eq!(listing, "[FILE] Cargo.toml\n[DIR] src");
    }
}
