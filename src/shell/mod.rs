//! Command execution for the shell side of a session.
//!
//! Non-interactive commands run through `$SHELL -c` with captured output and
//! a timeout. Interactive programs get the terminal directly.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Exit code reported when a command is killed for running too long.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Programs that need a real terminal.
const INTERACTIVE_COMMANDS: &[&str] = &[
    "vi", "vim", "nvim", "nano", "emacs", "htop", "top", "less", "more", "man", "ssh", "ftp",
    "telnet", "mysql", "psql", "python", "python3", "node", "irb", "bash", "sh", "zsh", "tmux",
    "screen", "watch",
];

/// Programs that stay interactive whatever their arguments.
const ALWAYS_INTERACTIVE: &[&str] = &[
    "vi", "vim", "nvim", "nano", "emacs", "less", "more", "man", "ssh", "top", "htop", "watch",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output_size(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<ExecutionOutput>;
}

/// Whether `command` should run attached to the terminal.
///
/// Only a bare program name counts: `python script.py` runs captured.
pub fn is_interactive(command: &str) -> bool {
    let mut words = command.split_whitespace();
    match (words.next(), words.next()) {
        (Some(first), None) => INTERACTIVE_COMMANDS.contains(&first),
        (Some(first), Some(_)) => ALWAYS_INTERACTIVE.contains(&first),
        _ => false,
    }
}

fn default_shell() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Cut `s` to at most `max_bytes`, on a char boundary, with a marker.
fn truncate_bytes_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }

    let mut cut = 0usize;
    for (idx, _) in s.char_indices() {
        if idx > max_bytes {
            break;
        }
        cut = idx;
    }
    let mut out = s[..cut].to_string();
    out.push_str("\n...(truncated)...\n");
    out
}

#[derive(Debug, Clone)]
pub struct BashExecutor {
    shell: String,
    timeout: Duration,
    max_output_bytes: usize,
}

impl Default for BashExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_OUTPUT_BYTES)
    }
}

impl BashExecutor {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            shell: default_shell(),
            timeout,
            max_output_bytes,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    async fn run_captured(&self, command: &str, cwd: &Path) -> Result<ExecutionOutput> {
        let mut c = Command::new(&self.shell);
        c.arg("-c").arg(command);
        c.current_dir(cwd);
        c.kill_on_drop(true);
        c.stdin(Stdio::null());

        let output = match timeout(self.timeout, c.output()).await {
            Ok(output) => output.with_context(|| format!("failed to spawn {}", self.shell))?,
            Err(_) => {
                warn!("Command timed out after {:?}: {}", self.timeout, command);
                return Ok(ExecutionOutput {
                    exit_code: TIMEOUT_EXIT_CODE,
                    stdout: String::new(),
                    stderr: format!(
                        "Command timed out after {}s (interactive command? try asking instead)\n",
                        self.timeout.as_secs()
                    ),
                });
            }
        };

        Ok(ExecutionOutput {
            // Killed by a signal: no code.
            exit_code: output.status.code().unwrap_or(-1),
            stdout: truncate_bytes_utf8(&String::from_utf8_lossy(&output.stdout), self.max_output_bytes),
            stderr: truncate_bytes_utf8(&String::from_utf8_lossy(&output.stderr), self.max_output_bytes),
        })
    }

    async fn run_attached(&self, command: &str, cwd: &Path) -> Result<ExecutionOutput> {
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("failed to spawn {}", self.shell))?;
        Ok(ExecutionOutput {
            exit_code: status.code().unwrap_or(-1),
            ..ExecutionOutput::default()
        })
    }
}

#[async_trait]
impl Executor for BashExecutor {
    async fn execute(&self, command: &str, cwd: &Path) -> Result<ExecutionOutput> {
        if is_interactive(command) {
            debug!("Running interactive command attached to the terminal: {}", command);
            self.run_attached(command, cwd).await
        } else {
            self.run_captured(command, cwd).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> BashExecutor {
        BashExecutor::default().with_shell("/bin/sh")
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = executor().execute("echo hello", dir.path()).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "");

        let out = executor()
            .execute("echo oops >&2; exit 3", dir.path())
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_runs_in_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = executor().execute("ls", dir.path()).await.unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[tokio::test]
    async fn test_timeout_reports_124() {
        let dir = tempfile::tempdir().unwrap();
        let exec = BashExecutor::new(Duration::from_millis(100), DEFAULT_MAX_OUTPUT_BYTES)
            .with_shell("/bin/sh");
        let out = exec.execute("sleep 5", dir.path()).await.unwrap();
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let exec = BashExecutor::new(DEFAULT_COMMAND_TIMEOUT, 16).with_shell("/bin/sh");
        let out = exec
            .execute("printf 'abcdefghijklmnopqrstuvwxyz'", dir.path())
            .await
            .unwrap();
        assert!(out.stdout.starts_with("abcdefghijklmnop"));
        assert!(out.stdout.contains("(truncated)"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let s = "ééééé"; // 2 bytes each
        let cut = truncate_bytes_utf8(s, 3);
        assert!(cut.starts_with("é"));
        assert!(!cut.starts_with("éé"));
    }

    #[test]
    fn test_interactive_detection() {
        assert!(is_interactive("vim"));
        assert!(is_interactive("vim notes.md"));
        assert!(is_interactive("python3"));
        assert!(is_interactive("ssh host"));
        assert!(!is_interactive("python3 script.py"));
        assert!(!is_interactive("ls -la"));
        assert!(!is_interactive(""));
    }
}
