//! Read-only tools served from the local machine.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::process::Command;

use super::{ToolBackend, ToolInfo};
use crate::context::RequestContext;
use crate::policy::PolicyEngine;
use crate::security::SensitiveDataFilter;

const MAX_READ_BYTES: u64 = 256 * 1024;
const DEFAULT_LOG_LIMIT: u64 = 10;

const TOOLS: &[(&str, &str)] = &[
    ("list_dir", "List a directory (`path`, default `.`)"),
    ("read_file", "Read a text file (`path`)"),
    ("git_status", "Short git status of the working directory"),
    ("git_diff", "Unstaged git diff of the working directory"),
    ("git_log", "Recent commits (`limit`, default 10)"),
    ("find_files", "Find files by name (`pattern`)"),
    ("grep_files", "Search file contents recursively (`pattern`)"),
];

/// Runs each tool as a fixed program with arguments, never through a shell.
pub struct LocalToolBackend {
    sensitive: Arc<SensitiveDataFilter>,
    policy: Arc<PolicyEngine>,
}

impl LocalToolBackend {
    pub fn new(sensitive: Arc<SensitiveDataFilter>, policy: Arc<PolicyEngine>) -> Self {
        Self { sensitive, policy }
    }

    /// Resolve `raw` and refuse it if it, or the file a symlink points to,
    /// is a forbidden path.
    fn permitted_path(&self, cwd: &str, raw: &str) -> Result<PathBuf> {
        let path = Self::resolve(cwd, raw);
        let real = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        for candidate in [&path, &real] {
            if let Some(violation) = self
                .policy
                .path_violation(&candidate.to_string_lossy(), Path::new(cwd))
            {
                bail!("refusing to access {}: {}", raw, violation.message);
            }
        }
        Ok(path)
    }

    fn resolve(cwd: &str, path: &str) -> PathBuf {
        let expanded = shellexpand::tilde(path);
        let path = Path::new(expanded.as_ref());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(cwd).join(path)
        }
    }

    async fn read_file(&self, cwd: &str, parameters: &Value) -> Result<Value> {
        let raw = str_param(parameters, "path")?;
        if let Some(reason) = self.sensitive.sensitive_file_reason(raw) {
            bail!("refusing to read {}: {}", raw, reason);
        }
        let path = self.permitted_path(cwd, raw)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("cannot stat {}", path.display()))?;
        if meta.len() > MAX_READ_BYTES {
            bail!("{} is larger than {} bytes", path.display(), MAX_READ_BYTES);
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Ok(json!({
            "path": path.to_string_lossy(),
            "content": self.sensitive.redact(&content),
        }))
    }

    async fn run(&self, cwd: &str, program: &str, args: &[String]) -> Result<Value> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", program))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let command = format!("{} {}", program, args.join(" "));
        Ok(json!({
            "exit_code": output.status.code(),
            "stdout": self.sensitive.filter_command_output(&command, &stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

fn str_param<'a>(parameters: &'a Value, key: &str) -> Result<&'a str> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string parameter '{}'", key))
}

#[async_trait]
impl ToolBackend for LocalToolBackend {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        Ok(TOOLS
            .iter()
            .map(|(name, description)| ToolInfo {
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect())
    }

    async fn call(&self, name: &str, parameters: &Value, ctx: &RequestContext) -> Result<Value> {
        let cwd = ctx.working_directory.as_str();
        match name {
            "read_file" => self.read_file(cwd, parameters).await,
            "list_dir" => {
                let path = parameters.get("path").and_then(Value::as_str).unwrap_or(".");
                let target = self.permitted_path(cwd, path)?;
                self.run(cwd, "ls", &["-la".to_string(), target.to_string_lossy().to_string()])
                    .await
            }
            "git_status" => self.run(cwd, "git", &strings(&["status", "--short", "--branch"])).await,
            "git_diff" => self.run(cwd, "git", &strings(&["diff", "--no-color"])).await,
            "git_log" => {
                let limit = parameters
                    .get("limit")
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_LOG_LIMIT);
                self.run(cwd, "git", &["log".to_string(), "--oneline".to_string(), format!("-n{}", limit)])
                    .await
            }
            "find_files" => {
                let pattern = str_param(parameters, "pattern")?;
                self.run(cwd, "find", &strings(&[".", "-name", pattern])).await
            }
            "grep_files" => {
                let pattern = str_param(parameters, "pattern")?;
                self.run(cwd, "grep", &strings(&["-rn", "--", pattern, "."])).await
            }
            other => bail!("unknown tool '{}'", other),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyDocument;

    fn backend() -> LocalToolBackend {
        LocalToolBackend::new(
            Arc::new(SensitiveDataFilter::new().unwrap()),
            Arc::new(PolicyEngine::new(PolicyDocument::default()).unwrap()),
        )
    }

    #[tokio::test]
    async fn test_read_file_redacts_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "db password=hunter2hunter2\nok\n").unwrap();
        let ctx = RequestContext::new(dir.path().to_string_lossy(), "alice", "s1");

        let value = backend()
            .call("read_file", &json!({"path": "notes.txt"}), &ctx)
            .await
            .unwrap();

        let content = value["content"].as_str().unwrap();
        assert!(!content.contains("hunter2hunter2"));
        assert!(content.contains("ok"));
    }

    #[tokio::test]
    async fn test_read_file_refuses_sensitive_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "TOKEN=x").unwrap();
        let ctx = RequestContext::new(dir.path().to_string_lossy(), "alice", "s1");

        let err = backend()
            .call("read_file", &json!({"path": ".env"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing to read"));
    }

    #[tokio::test]
    async fn test_forbidden_paths_are_refused() {
        let ctx = RequestContext::new("/etc", "alice", "s1");
        let b = backend();

        for (tool, path) in [("read_file", "/etc/passwd"), ("read_file", "shadow"), ("list_dir", "/boot")] {
            let err = b.call(tool, &json!({ "path": path }), &ctx).await.unwrap_err();
            assert!(err.to_string().contains("refusing to access"), "{} {}", tool, path);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_to_forbidden_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("/etc/passwd", dir.path().join("users.txt")).unwrap();
        let ctx = RequestContext::new(dir.path().to_string_lossy(), "alice", "s1");

        let err = backend()
            .call("read_file", &json!({"path": "users.txt"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("refusing to access"));
    }

    #[tokio::test]
    async fn test_list_dir_and_unknown_tool() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = RequestContext::new(dir.path().to_string_lossy(), "alice", "s1");
        let b = backend();

        let value = b.call("list_dir", &json!({}), &ctx).await.unwrap();
        assert!(value["stdout"].as_str().unwrap().contains("a.txt"));

        assert!(b.call("format_disk", &json!({}), &ctx).await.is_err());
        assert_eq!(b.list_tools().await.unwrap().len(), TOOLS.len());
    }
}
