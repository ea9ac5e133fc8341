//! Path, command and payload policy for the local tools.
//!
//! All checks are lexical and run before any side effect: a refused path is
//! never touched on disk and a refused command is never spawned.

use std::path::{Component, Path, PathBuf};

use crate::agent::config::GuardrailConfig;
use crate::error::ToolError;

/// Policy applied by the built-in tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardrails {
    root: PathBuf,
    blocked_paths: Vec<String>,
    allowed_commands: Vec<String>,
    max_write_bytes: usize,
}

impl Guardrails {
    /// Creates the policy for a project root.
    #[must_use]
    pub fn new(root: &Path, config: &GuardrailConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            blocked_paths: config
                .blocked_paths
                .iter()
                .map(|p| p.trim().trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            allowed_commands: config
                .allowed_commands
                .iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            max_write_bytes: config.max_write_bytes,
        }
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Payload ceiling in bytes.
    #[must_use]
    pub const fn max_write_bytes(&self) -> usize {
        self.max_write_bytes
    }

    /// Allow-listed command prefixes.
    #[must_use]
    pub fn allowed_commands(&self) -> &[String] {
        &self.allowed_commands
    }

    /// Normalizes `path` relative to the project root without touching disk.
    ///
    /// Absolute paths are accepted only when they lie under the root.
    /// Returns `None` when the path escapes the root.
    #[must_use]
    pub fn normalize(&self, path: &str) -> Option<PathBuf> {
        let input = Path::new(path);
        let relative = if input.is_absolute() {
            let root = lexical_normalize(&self.root)?;
            let absolute = lexical_normalize(input)?;
            absolute.strip_prefix(&root).ok()?.to_path_buf()
        } else {
            input.to_path_buf()
        };
        lexical_normalize(&relative)
    }

    /// Whether a root-relative path falls under the block-list.
    ///
    /// Matches when any component equals an entry or the path as a whole
    /// starts with one (so `.env` also covers `.env.production`).
    #[must_use]
    pub fn is_blocked(&self, relative: &Path) -> bool {
        let as_text = relative.to_string_lossy().replace('\\', "/");
        self.blocked_paths.iter().any(|entry| {
            as_text.starts_with(entry.as_str())
                || relative
                    .components()
                    .any(|c| c.as_os_str().to_string_lossy() == entry.as_str())
                || as_text.contains(&format!("/{entry}/"))
        })
    }

    /// Resolves a tool-supplied path to an absolute path under the root.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::BlockedPath`] if the path escapes the root or
    /// matches the block-list.
    pub fn resolve_path(&self, path: &str) -> Result<PathBuf, ToolError> {
        let blocked = || ToolError::BlockedPath {
            path: path.to_string(),
        };
        let relative = self.normalize(path).ok_or_else(blocked)?;
        if self.is_blocked(&relative) {
            return Err(blocked());
        }
        Ok(self.root.join(relative))
    }

    /// Checks a shell command against the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::CommandNotAllowed`] unless the trimmed command
    /// starts with an allow-listed prefix and chains no further commands.
    pub fn check_command(&self, command: &str) -> Result<(), ToolError> {
        const CHAINING: &[&str] = &[";", "&", "|", "`", "$(", "\n"];
        let command = command.trim();
        let chained = CHAINING.iter().any(|op| command.contains(op));
        let allowed = !chained && self.allowed_commands.iter().any(|prefix| {
            command == prefix
                || command
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with(char::is_whitespace))
        });
        if allowed {
            Ok(())
        } else {
            Err(ToolError::CommandNotAllowed {
                command: command.to_string(),
                allowed: self.allowed_commands.join(", "),
            })
        }
    }

    /// Checks a payload size against the ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::PayloadTooLarge`] if `size` exceeds the ceiling.
    pub const fn check_payload(&self, size: usize) -> Result<(), ToolError> {
        if size > self.max_write_bytes {
            Err(ToolError::PayloadTooLarge {
                size,
                limit: self.max_write_bytes,
            })
        } else {
            Ok(())
        }
    }
}

/// Resolves `.` and `..` lexically. Returns `None` if `..` climbs above the start.
fn lexical_normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
        }
    }
    Some(out)
}
