//! System prompt for the assistant.
//!
//! The prompt is loaded from an external template file when one is
//! configured or present in the user config directory, falling back to the
//! compiled-in default. `{project_dir}` in the template is replaced with the
//! working directory the tools operate in.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Default system prompt template.
pub const DEFAULT_SYSTEM_PROMPT: &str = r"You are deskmate, a personal AI assistant running on the user's machine.
You are helpful, friendly, and direct.

You can:
- Answer questions on any topic
- Read, write, and search files in the project
- Run allow-listed shell commands and inspect or commit git changes
- Fetch web pages, search the web, and call HTTP APIs
- Execute short JavaScript, TypeScript, Python, or Bash snippets

You are working in project directory: {project_dir}

Use tools when they help answer the request; do not guess file contents or command output.
When a tool fails, read the error and either correct the call or explain what went wrong.
Be concise. Always engage with the user, including simple greetings.";

/// Template placeholder for the project directory.
const PROJECT_DIR_PLACEHOLDER: &str = "{project_dir}";
/// Subdirectory of the user config dir holding templates.
const CONFIG_SUBDIR: &str = "deskmate";
/// Template filename looked up in the config directory.
const PROMPT_FILENAME: &str = "system.md";

/// Default template location under the user's config directory.
///
/// Returns `None` if the config directory cannot be determined.
#[must_use]
pub fn default_prompt_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(CONFIG_SUBDIR).join(PROMPT_FILENAME))
}

/// Resolves the system prompt.
///
/// Resolution order: `prompt_file`, then `<config dir>/deskmate/system.md`,
/// then [`DEFAULT_SYSTEM_PROMPT`]. An explicit file that cannot be read is
/// logged and skipped.
#[must_use]
pub fn load_system_prompt(prompt_file: Option<&Path>, project_dir: &Path) -> String {
    let from_explicit = prompt_file.and_then(|path| match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read prompt file, using default");
            None
        }
    });

    let template = from_explicit
        .or_else(|| default_prompt_path().and_then(|p| std::fs::read_to_string(p).ok()))
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    render(&template, project_dir)
}

fn render(template: &str, project_dir: &Path) -> String {
    template.replace(PROJECT_DIR_PLACEHOLDER, &project_dir.display().to_string())
}
