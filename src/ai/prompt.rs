//! Prompt building for model requests.
//!
//! The user's text reaches this module already redacted; the context block
//! only carries session facts (directory, last command), never file contents.

/// System prompt that defines the assistant's behaviour.
pub const SYSTEM_PROMPT: &str = r#"You are an assistant embedded in a guarded interactive shell. Users type either shell commands or natural language; you only see the natural language. Help them get things done in the terminal quickly and safely.

Response format:
- Give ready-to-run commands first, each on its own line, then a short explanation.
- Prefer one-liners; chain related steps with && and use \ for continuation.

Safety rules:
- Never suggest rm -rf /, rm -rf *, chmod 777 on system paths, dd onto disks, kill -9 1 or sudo su -.
- Never suggest editing /etc/passwd, /etc/shadow or /etc/sudoers directly; use the proper tools.
- Never suggest reading .env files, SSH keys or anything that would print credentials.
- Prefer rm -i, --dry-run and backups before destructive steps.
- Prefer chmod 755 or 644 over 777, and kill -TERM before kill -9.

If a request could cause data loss, instability or privilege escalation, say why and offer a safer alternative.
Text shown as [REDACTED ...] or [BLOCKED: ...] was removed by the shell; ask the user to rephrase without secrets."#;

/// Session facts sent alongside the user's text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub working_directory: String,
    pub user: String,
    pub last_command: Option<String>,
    pub last_exit_code: Option<i32>,
}

impl PromptContext {
    /// One fact per line; empty when nothing is known.
    pub fn format_for_prompt(&self) -> String {
        let mut parts = Vec::new();
        if !self.working_directory.is_empty() {
            parts.push(format!("Working directory: {}", self.working_directory));
        }
        if !self.user.is_empty() {
            parts.push(format!("User: {}", self.user));
        }
        if let Some(command) = &self.last_command {
            parts.push(format!("Last command: {}", command));
        }
        // A clean exit is not worth mentioning.
        if let Some(code) = self.last_exit_code.filter(|c| *c != 0) {
            parts.push(format!("Last command exit code: {}", code));
        }
        parts.join("\n")
    }
}

/// The system message carrying session context, if there is any.
pub fn build_context_message(ctx: &PromptContext) -> Option<String> {
    let facts = ctx.format_for_prompt();
    if facts.is_empty() {
        None
    } else {
        Some(format!("Current context:\n{}", facts))
    }
}
