//! Rule-driven policy engine.
//!
//! Commands and tool calls are evaluated against a reloadable
//! [`PolicyDocument`] plus a fixed set of critical patterns that no document
//! can weaken. The result is a [`PolicyDecision`]: a verdict and the
//! violations that produced it.

mod document;
mod patterns;

use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::context::RequestContext;

pub use document::{
    AuditSettings, CommandPolicies, PathPolicies, PolicyDocument, SecuritySettings, ToolPolicies,
};
pub use patterns::{command_heads, command_segments, matches_wildcard};

const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("failed to access rule document {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed rule document {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize rule document: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid critical pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allow,
    Deny,
    RequireApproval,
    DryRunOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationClass {
    Security,
    Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_name: String,
    pub class: ViolationClass,
    pub message: String,
    pub severity: Severity,
    pub remediation: String,
}

impl Violation {
    fn new(
        rule_name: &str,
        class: ViolationClass,
        message: String,
        severity: Severity,
        remediation: &str,
    ) -> Self {
        Self {
            rule_name: rule_name.to_string(),
            class,
            message,
            severity,
            remediation: remediation.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub verdict: PolicyVerdict,
    pub violations: Vec<Violation>,
}

impl PolicyDecision {
    /// A critical violation always turns the verdict into `Deny`.
    pub fn new(verdict: PolicyVerdict, violations: Vec<Violation>) -> Self {
        let verdict = if violations.iter().any(|v| v.severity == Severity::Critical) {
            PolicyVerdict::Deny
        } else {
            verdict
        };
        Self { verdict, violations }
    }

    pub fn allow() -> Self {
        Self::new(PolicyVerdict::Allow, Vec::new())
    }

    pub fn is_allowed(&self) -> bool {
        self.verdict == PolicyVerdict::Allow
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.violations.iter().map(|v| v.severity).max()
    }

    /// Violation messages joined for a one-line reason.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Evaluates commands and tool calls against the rule document.
#[derive(Debug)]
pub struct PolicyEngine {
    source: Option<PathBuf>,
    document: RwLock<PolicyDocument>,
    critical: Vec<(Regex, &'static str)>,
}

impl PolicyEngine {
    /// Engine over an in-memory document, with no file behind it.
    pub fn new(document: PolicyDocument) -> Result<Self, PolicyError> {
        Ok(Self {
            source: None,
            document: RwLock::new(document),
            critical: patterns::compile_critical()?,
        })
    }

    /// Load the document at `path`.
    ///
    /// A missing file is replaced by the default document, which is written
    /// back. A malformed file is left alone and the defaults are used in memory.
    pub fn load_or_create(path: impl Into<PathBuf>) -> Result<Self, PolicyError> {
        let path = path.into();
        let document = if path.exists() {
            match PolicyDocument::load(&path) {
                Ok(doc) => {
                    info!("Loaded rule document from {}", path.display());
                    doc
                }
                Err(e) => {
                    warn!("{}; falling back to the default rules", e);
                    PolicyDocument::default()
                }
            }
        } else {
            let doc = PolicyDocument::default();
            match doc.save(&path) {
                Ok(()) => info!("Created default rule document at {}", path.display()),
                Err(e) => warn!("Could not persist default rule document: {}", e),
            }
            doc
        };

        let mut engine = Self::new(document)?;
        engine.source = Some(path);
        Ok(engine)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Re-read the document from disk. Returns whether anything changed.
    ///
    /// On error the current document stays in force.
    pub fn reload(&self) -> Result<bool, PolicyError> {
        let Some(path) = &self.source else {
            return Ok(false);
        };
        let fresh = PolicyDocument::load(path)?;
        let mut current = self.write();
        let changed = *current != fresh;
        *current = fresh;
        if changed {
            info!("Rule document reloaded from {}", path.display());
        }
        Ok(changed)
    }

    /// Snapshot of the rules currently in force.
    pub fn document(&self) -> PolicyDocument {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, PolicyDocument> {
        self.document.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PolicyDocument> {
        self.document.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// The first critical pattern `command` matches, if any.
    pub fn critical_violation(&self, command: &str) -> Option<Violation> {
        self.critical
            .iter()
            .find(|(re, _)| re.is_match(command))
            .map(|(_, description)| {
                Violation::new(
                    "critical_security_pattern",
                    ViolationClass::Security,
                    format!("Critical security violation: {}", description),
                    Severity::Critical,
                    "Command blocked for security",
                )
            })
    }

    pub fn validate_command(&self, command: &str, ctx: &RequestContext) -> PolicyDecision {
        if let Some(violation) = self.critical_violation(command) {
            return PolicyDecision::new(PolicyVerdict::Deny, vec![violation]);
        }

        let doc = self.read();
        let mut violations = Vec::new();

        let max_length = doc.security.max_command_length;
        if command.chars().count() > max_length {
            violations.push(Violation::new(
                "max_command_length",
                ViolationClass::Security,
                format!("Command exceeds maximum length ({} chars)", max_length),
                Severity::Medium,
                "Shorten command or break into multiple commands",
            ));
        }

        if doc.security.enable_command_filtering {
            let rules = &doc.command_policies;
            let heads = command_heads(command);

            if let Some(pattern) = first_match(&heads, &rules.forbidden_commands) {
                violations.push(Violation::new(
                    "forbidden_command",
                    ViolationClass::Security,
                    format!("Command matches forbidden pattern: {}", pattern),
                    Severity::High,
                    "Use alternative command or request approval",
                ));
                return PolicyDecision::new(PolicyVerdict::Deny, violations);
            }

            if let Some(pattern) = first_match(&heads, &rules.require_approval) {
                violations.push(Violation::new(
                    "requires_approval",
                    ViolationClass::Policy,
                    format!("Command requires approval: {}", pattern),
                    Severity::Medium,
                    "Request human approval before execution",
                ));
                return PolicyDecision::new(PolicyVerdict::RequireApproval, violations);
            }

            if let Some(pattern) = first_match(&heads, &rules.dry_run_only) {
                violations.push(Violation::new(
                    "dry_run_only",
                    ViolationClass::Policy,
                    format!("Command only allowed in dry-run mode: {}", pattern),
                    Severity::Medium,
                    "Add --dry-run flag or equivalent",
                ));
                return PolicyDecision::new(PolicyVerdict::DryRunOnly, violations);
            }
        }

        if doc.security.enable_path_restrictions {
            violations.extend(forbidden_path_violations(
                command,
                &doc.path_policies.forbidden_paths,
                Path::new(&ctx.working_directory),
            ));
        }

        if violations.is_empty() {
            PolicyDecision::allow()
        } else {
            // Deny when a path violation is critical, otherwise approval.
            PolicyDecision::new(PolicyVerdict::RequireApproval, violations)
        }
    }

    /// The forbidden-path violation for `path`, resolved against `cwd`.
    ///
    /// `None` when the path is allowed or path restrictions are switched off.
    pub fn path_violation(&self, path: &str, cwd: &Path) -> Option<Violation> {
        let doc = self.read();
        if !doc.security.enable_path_restrictions {
            return None;
        }
        path_violation_in(path, &doc.path_policies.forbidden_paths, cwd)
    }

    pub fn validate_tool_call(&self, tool: &str) -> PolicyDecision {
        let doc = self.read();
        let rules = &doc.tool_policies;

        if rules.forbidden_tools.iter().any(|t| t == tool) {
            return PolicyDecision::new(
                PolicyVerdict::Deny,
                vec![Violation::new(
                    "forbidden_tool",
                    ViolationClass::Security,
                    format!("Tool is forbidden: {}", tool),
                    Severity::High,
                    "Use alternative tool or request policy change",
                )],
            );
        }

        if rules
            .require_approval_tools
            .iter()
            .any(|pattern| tool.contains(pattern.as_str()))
        {
            return PolicyDecision::new(
                PolicyVerdict::RequireApproval,
                vec![Violation::new(
                    "tool_requires_approval",
                    ViolationClass::Policy,
                    format!("Tool requires approval: {}", tool),
                    Severity::Medium,
                    "Request human approval before execution",
                )],
            );
        }

        if !rules.allowed_tools.is_empty() && !rules.allowed_tools.iter().any(|t| t == tool) {
            return PolicyDecision::new(
                PolicyVerdict::Deny,
                vec![Violation::new(
                    "tool_not_allowed",
                    ViolationClass::Policy,
                    format!("Tool not in allowed list: {}", tool),
                    Severity::Medium,
                    "Add tool to allowed list or use alternative",
                )],
            );
        }

        PolicyDecision::allow()
    }

    pub fn tool_timeout(&self, tool: &str) -> Duration {
        let doc = self.read();
        let timeouts = &doc.tool_policies.tool_timeouts;
        let secs = timeouts
            .get(tool)
            .or_else(|| timeouts.get("default"))
            .copied()
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn audit_settings(&self) -> AuditSettings {
        self.read().audit.clone()
    }

    pub fn should_audit_commands(&self) -> bool {
        let doc = self.read();
        doc.security.enable_audit_logging && doc.audit.log_all_commands
    }

    pub fn should_audit_model_interactions(&self) -> bool {
        let doc = self.read();
        doc.security.enable_audit_logging && doc.audit.log_ai_interactions
    }

    pub fn should_audit_violations(&self) -> bool {
        let doc = self.read();
        doc.security.enable_audit_logging && doc.audit.log_policy_violations
    }
}

/// The first rule pattern matching any simple command of the line.
fn first_match<'a>(heads: &[String], patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .find(|p| heads.iter().any(|head| matches_wildcard(head, p)))
        .map(String::as_str)
}

fn path_violation_in(path: &str, forbidden: &[String], cwd: &Path) -> Option<Violation> {
    let normalized = patterns::normalize(path, cwd);
    forbidden
        .iter()
        .any(|entry| patterns::path_matches(&normalized, entry, cwd))
        .then(|| {
            Violation::new(
                "forbidden_path_access",
                ViolationClass::Security,
                format!("Access to forbidden path: {}", path),
                Severity::Critical,
                "Use alternative path or request approval",
            )
        })
}

fn forbidden_path_violations(command: &str, forbidden: &[String], cwd: &Path) -> Vec<Violation> {
    patterns::extract_paths(command)
        .into_iter()
        .filter_map(|token| path_violation_in(token, forbidden, cwd))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::new("/home/alice/project", "alice", "test-session")
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyDocument::default()).unwrap()
    }

    #[test]
    fn test_critical_patterns_deny() {
        let engine = engine();
        for cmd in [
            "rm -rf /",
            "dd if=/dev/zero of=/dev/sda",
            "chmod 777 /",
            "kill -9 1",
            "sudo su -",
        ] {
            let decision = engine.validate_command(cmd, &ctx());
            assert_eq!(decision.verdict, PolicyVerdict::Deny, "{}", cmd);
            assert_eq!(decision.violations[0].rule_name, "critical_security_pattern");
            assert_eq!(decision.max_severity(), Some(Severity::Critical));
        }
    }

    #[test]
    fn test_critical_patterns_ignore_disabled_filtering() {
        let mut doc = PolicyDocument::default();
        doc.security.enable_command_filtering = false;
        let engine = PolicyEngine::new(doc).unwrap();

        assert_eq!(
            engine.validate_command("sudo su -", &ctx()).verdict,
            PolicyVerdict::Deny
        );
        assert_eq!(
            engine.validate_command("reboot", &ctx()).verdict,
            PolicyVerdict::Allow
        );
    }

    #[test]
    fn test_plain_command_allowed() {
        let decision = engine().validate_command("ls -la", &ctx());
        assert_eq!(decision, PolicyDecision::allow());
    }

    #[test]
    fn test_max_length_requires_approval() {
        let mut doc = PolicyDocument::default();
        doc.security.max_command_length = 10;
        let engine = PolicyEngine::new(doc).unwrap();

        let decision = engine.validate_command("echo hello world", &ctx());
        assert_eq!(decision.verdict, PolicyVerdict::RequireApproval);
        assert_eq!(decision.violations[0].rule_name, "max_command_length");
    }

    #[test]
    fn test_forbidden_approval_and_dry_run_lists() {
        let engine = engine();

        let decision = engine.validate_command("reboot now", &ctx());
        assert_eq!(decision.verdict, PolicyVerdict::Deny);
        assert_eq!(decision.violations[0].severity, Severity::High);

        let decision = engine.validate_command("kill -9 4242", &ctx());
        assert_eq!(decision.verdict, PolicyVerdict::RequireApproval);
        assert_eq!(decision.violations[0].rule_name, "requires_approval");

        let decision = engine.validate_command("chown -R root /srv/app", &ctx());
        assert_eq!(decision.verdict, PolicyVerdict::DryRunOnly);
    }

    #[test]
    fn test_rules_apply_to_every_simple_command() {
        let engine = engine();

        for cmd in [
            "sudo reboot",
            "ls && reboot",
            "ls; shutdown -h now",
            "true || env FORCE=1 halt",
            "echo done | nohup poweroff",
        ] {
            let decision = engine.validate_command(cmd, &ctx());
            assert_eq!(decision.verdict, PolicyVerdict::Deny, "{}", cmd);
            assert_eq!(decision.violations[0].rule_name, "forbidden_command", "{}", cmd);
        }

        assert_eq!(
            engine.validate_command("make && sudo kill -9 4242", &ctx()).verdict,
            PolicyVerdict::RequireApproval
        );
        assert!(engine.validate_command("echo reboot", &ctx()).is_allowed());
        assert!(engine.validate_command("git commit -m 'fix; reboot'", &ctx()).is_allowed());
    }

    #[test]
    fn test_path_violation() {
        let engine = engine();
        let cwd = Path::new("/etc");

        let violation = engine.path_violation("/etc/passwd", Path::new("/")).unwrap();
        assert_eq!(violation.rule_name, "forbidden_path_access");
        assert_eq!(violation.severity, Severity::Critical);
        assert!(engine.path_violation("shadow", cwd).is_some());
        assert!(engine.path_violation("hosts", cwd).is_none());

        let mut doc = PolicyDocument::default();
        doc.security.enable_path_restrictions = false;
        let relaxed = PolicyEngine::new(doc).unwrap();
        assert!(relaxed.path_violation("/etc/passwd", cwd).is_none());
    }

    #[test]
    fn test_forbidden_paths() {
        let engine = engine();

        for cmd in ["ls /boot/grub", "head -c 16 /dev/sda", "ls ../../../etc/shadow"] {
            let decision = engine.validate_command(cmd, &ctx());
            assert_eq!(decision.verdict, PolicyVerdict::Deny, "{}", cmd);
            assert_eq!(decision.violations[0].rule_name, "forbidden_path_access");
        }

        assert!(engine.validate_command("ls /etc/passwd.bak", &ctx()).is_allowed());
    }

    #[test]
    fn test_path_restrictions_toggle() {
        let mut doc = PolicyDocument::default();
        doc.security.enable_path_restrictions = false;
        let engine = PolicyEngine::new(doc).unwrap();

        assert!(engine.validate_command("ls /boot", &ctx()).is_allowed());
    }

    #[test]
    fn test_critical_violation_forces_deny() {
        let decision = PolicyDecision::new(
            PolicyVerdict::Allow,
            vec![Violation::new(
                "x",
                ViolationClass::Security,
                "boom".to_string(),
                Severity::Critical,
                "stop",
            )],
        );
        assert_eq!(decision.verdict, PolicyVerdict::Deny);
    }

    #[test]
    fn test_validate_tool_call() {
        let engine = engine();
        assert_eq!(engine.validate_tool_call("run_shell").verdict, PolicyVerdict::Deny);
        assert_eq!(
            engine.validate_tool_call("write_notes").verdict,
            PolicyVerdict::RequireApproval
        );
        assert_eq!(engine.validate_tool_call("read_file").verdict, PolicyVerdict::Allow);

        let decision = engine.validate_tool_call("weather");
        assert_eq!(decision.verdict, PolicyVerdict::Deny);
        assert_eq!(decision.violations[0].rule_name, "tool_not_allowed");

        let mut doc = PolicyDocument::default();
        doc.tool_policies.allowed_tools.clear();
        let open = PolicyEngine::new(doc).unwrap();
        assert!(open.validate_tool_call("weather").is_allowed());
    }

    #[test]
    fn test_tool_timeout() {
        let engine = engine();
        assert_eq!(engine.tool_timeout("run"), Duration::from_secs(30));
        assert_eq!(engine.tool_timeout("read_file"), Duration::from_secs(10));

        let mut doc = PolicyDocument::default();
        doc.tool_policies.tool_timeouts.clear();
        let bare = PolicyEngine::new(doc).unwrap();
        assert_eq!(bare.tool_timeout("run"), Duration::from_secs(10));
    }

    #[test]
    fn test_load_or_create_persists_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");

        let engine = PolicyEngine::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(engine.document(), PolicyDocument::default());
    }

    #[test]
    fn test_malformed_document_falls_back_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        fs::write(&path, "[security\nbroken").unwrap();

        let engine = PolicyEngine::load_or_create(&path).unwrap();
        assert_eq!(engine.document(), PolicyDocument::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[security\nbroken");
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.toml");
        let engine = PolicyEngine::load_or_create(&path).unwrap();

        assert!(engine.validate_command("terraform destroy", &ctx()).is_allowed());

        let mut doc = PolicyDocument::default();
        doc.command_policies.forbidden_commands = vec!["terraform destroy*".to_string()];
        doc.save(&path).unwrap();

        assert!(engine.reload().unwrap());
        assert_eq!(
            engine.validate_command("terraform destroy", &ctx()).verdict,
            PolicyVerdict::Deny
        );
        assert!(!engine.reload().unwrap());
    }

    #[test]
    fn test_audit_toggles() {
        let mut doc = PolicyDocument::default();
        doc.audit.log_ai_interactions = false;
        let engine = PolicyEngine::new(doc).unwrap();

        assert!(engine.should_audit_commands());
        assert!(!engine.should_audit_model_interactions());
        assert!(engine.should_audit_violations());
    }
}
