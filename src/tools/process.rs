//! Child process helper shared by the shell, git and sandbox tools.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;

/// Captured result of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Converts a non-zero exit into [`ToolError::Failed`], keeping stdout
    /// as partial output.
    pub fn into_result(self) -> Result<String, ToolError> {
        if self.success {
            return Ok(self.stdout);
        }
        let message = if self.stderr.trim().is_empty() {
            match self.code {
                Some(code) => format!("process exited with status {code}"),
                None => "process terminated by signal".to_string(),
            }
        } else {
            self.stderr.trim_end().to_string()
        };
        Err(ToolError::Failed {
            message,
            output: self.stdout,
        })
    }
}

/// Runs `program args..` in `cwd` and captures its output.
///
/// The child is killed if the returned future is dropped, so aborting the
/// calling task (e.g. on timeout) never leaves it running.
pub(crate) async fn run(
    tool: &str,
    program: &str,
    args: &[&str],
    cwd: &Path,
) -> Result<ProcessOutput, ToolError> {
    debug!(tool, program, ?args, cwd = %cwd.display(), "spawning process");
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ToolError::Execution {
            name: tool.to_string(),
            message: format!("failed to start {program}: {e}"),
        })?;

    Ok(ProcessOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_keeps_stdout_as_partial_output() {
        let output = ProcessOutput {
            success: false,
            code: Some(1),
            stdout: "2 passed\n".to_string(),
            stderr: "1 failed\n".to_string(),
        };
        match output.into_result() {
            Err(err @ ToolError::Failed { .. }) => {
                assert_eq!(err.to_string(), "1 failed");
                assert_eq!(err.partial_output(), "2 passed\n");
            }
            other => unreachable!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failure_without_stderr_reports_status() {
        let output = ProcessOutput {
            success: false,
            code: Some(3),
            stdout: String::new(),
            stderr: String::new(),
        };
        let err = output.into_result().err().map(|e| e.to_string());
        assert_eq!(err.as_deref(), Some("process exited with status 3"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_stdout() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let output = run("test", "sh", &["-c", "echo hi; echo oops >&2"], dir.path())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(output.success);
        assert_eq!(output.stdout, "hi\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_error() {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let err = run("test", "definitely-not-a-binary-xyz", &[], dir.path()).await;
        assert!(matches!(err, Err(ToolError::Execution { .. })));
    }
}
