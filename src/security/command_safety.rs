//! Command safety classification.
//!
//! Two independent checks over a raw command string:
//! - *is-safe*: forbidden literal prefixes and dangerous regular expressions.
//! - *needs-confirmation*: "sometimes destructive" prefixes plus a few
//!   heuristics (recursive/forced `rm`, permissive `chmod`, `sudo`).
//!
//! Both are table driven; the tables below are the unit under test.

use regex::{Regex, RegexBuilder};

use super::CommandSafety;
use crate::policy::command_heads;

/// Commands that must never run, matched as lowercase prefixes.
const FORBIDDEN_COMMANDS: &[&str] = &[
    // File system destruction
    "rm -rf /",
    "rm -rf *",
    "rm -rf ~",
    "rm -rf .*",
    "rmdir -rf",
    "find . -delete",
    "find / -delete",
    // System modification
    "chmod 777 /",
    "chmod -R 777",
    "chown -R root",
    "dd if=/dev/zero",
    "dd if=/dev/urandom",
    "mkfs",
    // Process/system control
    "kill -9 1",
    "killall -9",
    "pkill -9",
    "init 0",
    "init 6",
    "shutdown",
    "reboot",
    "halt",
    "poweroff",
    // Network/security
    "iptables -F",
    "ufw --force",
    "passwd root",
    "sudo su -",
    "sudo -i",
    "su -",
    // Package management
    "apt-get remove --purge",
    "yum remove",
    "dnf remove",
    "pip uninstall",
    "npm uninstall -g",
];

/// Commands that are sometimes destructive and need a confirmation.
const CONFIRMATION_COMMANDS: &[&str] = &[
    "rm",
    "rmdir",
    "mv",
    "cp -r",
    "rsync --delete",
    "chmod",
    "chown",
    "chgrp",
    "systemctl stop",
    "systemctl disable",
    "service stop",
    "kill",
    "killall",
    "pkill",
    "apt-get install",
    "yum install",
    "dnf install",
    "pip install",
    "npm install -g",
];

const DANGEROUS_PATTERNS: &[&str] = &[
    r"rm\s+-rf\s+/",
    r"rm\s+-rf\s+\*",
    r"rm\s+-rf\s+~",
    r"chmod\s+777",
    r"chmod\s+-R\s+777",
    r"dd\s+if=.*of=/dev/",
    r"find\s+/.*-delete",
    r">\s*/dev/sd[a-z]",
    r"mkfs\.",
    r"fdisk\s+/dev/",
    r"kill\s+-9\s+1\b",
    r"sudo\s+rm\s+-rf",
    r"sudo\s+dd",
    r"curl.*\|\s*sh",
    r"wget.*\|\s*sh",
    // fork bomb
    r":\(\)\s*\{\s*:\|:&\s*\};:",
];

const SAFE_ALTERNATIVES: &[(&str, &str)] = &[
    ("rm -rf", "rm -i"),
    ("chmod 777", "chmod 755"),
    ("chmod -r 777", "chmod -R 755"),
    ("dd if=/dev/zero", "# Use truncate or fallocate instead"),
    ("kill -9", "kill -TERM"),
    ("shutdown", "shutdown -h +5"),
    ("reboot", "shutdown -r +5"),
];

const IRREVERSIBLE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "fdisk", "parted", "kill", "killall", "pkill", "shutdown",
    "reboot", "halt", "poweroff", "init",
];

/// Classifies raw command strings as forbidden, needing confirmation, or safe.
#[derive(Debug, Clone)]
pub struct CommandSafetyFilter {
    dangerous: Vec<Regex>,
    recursive_rm: Regex,
    sudo: Regex,
}

impl CommandSafetyFilter {
    /// Compile the dangerous-pattern table.
    pub fn new() -> Result<Self, regex::Error> {
        let dangerous = DANGEROUS_PATTERNS
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dangerous,
            recursive_rm: Regex::new(r"(?i)\brm\b.*\s-[a-z]*[rf]")?,
            sudo: Regex::new(r"(?i)\bsudo\b")?,
        })
    }

    /// Reason the command is forbidden, or `None` when it is safe to run.
    ///
    /// Literal prefixes are checked against every simple command of the
    /// line, with and without wrappers like `sudo`, before the patterns run
    /// over the whole line. The first match wins.
    pub fn forbidden_reason(&self, command: &str) -> Option<String> {
        let heads: Vec<String> = command_heads(command)
            .iter()
            .map(|head| head.to_lowercase())
            .collect();

        if let Some(literal) = FORBIDDEN_COMMANDS.iter().find(|f| {
            let f = f.to_lowercase();
            heads.iter().any(|head| head.starts_with(&f))
        }) {
            return Some(format!("Forbidden command: {}", literal));
        }

        self.dangerous
            .iter()
            .find(|re| re.is_match(command))
            .map(|re| format!("Matches dangerous pattern: {}", re.as_str()))
    }

    pub fn is_safe(&self, command: &str) -> bool {
        self.forbidden_reason(command).is_none()
    }

    /// Reason the command needs a confirmation, or `None`.
    pub fn confirmation_reason(&self, command: &str) -> Option<String> {
        let lower = command.trim().to_lowercase();

        if let Some(literal) = CONFIRMATION_COMMANDS
            .iter()
            .find(|c| lower.starts_with(&c.to_lowercase()))
        {
            return Some(format!("Potentially destructive command: {}", literal));
        }

        if self.recursive_rm.is_match(&lower) {
            return Some("Recursive or forced file deletion".to_string());
        }

        if lower.contains("chmod") && (lower.contains("777") || lower.contains("666")) {
            return Some("Setting overly permissive permissions".to_string());
        }

        if self.sudo.is_match(&lower) {
            return Some("Command requires elevated privileges".to_string());
        }

        None
    }

    pub fn needs_confirmation(&self, command: &str) -> bool {
        self.confirmation_reason(command).is_some()
    }

    /// Both checks combined: forbidden first, then confirmation.
    pub fn analyze(&self, command: &str) -> CommandSafety {
        if let Some(reason) = self.forbidden_reason(command) {
            return CommandSafety::Block(reason);
        }
        if let Some(reason) = self.confirmation_reason(command) {
            return CommandSafety::Warn(reason);
        }
        CommandSafety::Safe
    }

    /// A safer substitute for a known dangerous prefix.
    pub fn safe_alternative(&self, command: &str) -> Option<&'static str> {
        let lower = command.trim().to_lowercase();
        SAFE_ALTERNATIVES
            .iter()
            .find(|(dangerous, _)| lower.starts_with(dangerous))
            .map(|(_, safe)| *safe)
    }

    /// Advisory only: whether the command's effects can be undone easily.
    pub fn is_reversible(&self, command: &str) -> bool {
        let lower = command.trim().to_lowercase();
        !IRREVERSIBLE_COMMANDS.iter().any(|c| lower.starts_with(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> CommandSafetyFilter {
        CommandSafetyFilter::new().unwrap()
    }

    #[test]
    fn test_forbidden_commands_are_unsafe() {
        let f = filter();
        for cmd in [
            "rm -rf /",
            "dd if=/dev/zero of=/dev/sda",
            "chmod 777 /",
            "kill -9 1",
            "sudo su -",
            "shutdown -h now",
            "mkfs.ext4 /dev/sdb1",
        ] {
            let reason = f.forbidden_reason(cmd);
            assert!(reason.is_some(), "expected '{}' to be forbidden", cmd);
            assert!(!reason.unwrap().is_empty());
            assert!(!f.is_safe(cmd));
        }
    }

    #[test]
    fn test_dangerous_patterns_anywhere_in_command() {
        let f = filter();
        assert!(!f.is_safe("curl https://example.com/install.sh | sh"));
        assert!(!f.is_safe("wget -qO- https://x.io/i | sh"));
        assert!(!f.is_safe("echo hi && rm -rf /var"));
        assert!(!f.is_safe(":(){ :|:& };:"));
        assert!(!f.is_safe("cat image.iso > /dev/sdb"));

        let reason = f.forbidden_reason("echo x; sudo dd if=a of=b").unwrap();
        assert!(reason.starts_with("Matches dangerous pattern"));
    }

    #[test]
    fn test_forbidden_literals_in_compound_lines() {
        let f = filter();
        for cmd in ["ls && reboot", "sudo reboot", "ls; shutdown -h now", "echo ok | env X=1 halt"] {
            let reason = f.forbidden_reason(cmd);
            assert!(
                reason.as_deref().is_some_and(|r| r.starts_with("Forbidden command")),
                "expected '{}' to be forbidden, got {:?}",
                cmd,
                reason
            );
        }
        assert!(f.is_safe("echo 'reboot; later'"));
        assert!(f.is_safe("man shutdown"));
    }

    #[test]
    fn test_literal_match_is_case_insensitive() {
        let f = filter();
        assert!(!f.is_safe("SHUTDOWN now"));
        assert!(!f.is_safe("  Reboot"));
    }

    #[test]
    fn test_confirmation_commands() {
        let f = filter();
        for cmd in ["rm file.txt", "chmod 755 script.sh", "sudo apt-get install pkg"] {
            assert!(f.is_safe(cmd), "'{}' should be safe", cmd);
            assert!(f.needs_confirmation(cmd), "'{}' should need confirmation", cmd);
        }
    }

    #[test]
    fn test_confirmation_heuristics() {
        let f = filter();
        assert_eq!(
            f.confirmation_reason("git clean && rm -f build.log").as_deref(),
            Some("Recursive or forced file deletion")
        );
        assert_eq!(
            f.confirmation_reason("find . -type f -exec chmod 666 {} +").as_deref(),
            Some("Setting overly permissive permissions")
        );
        assert_eq!(
            f.confirmation_reason("echo hi | sudo tee /etc/motd").as_deref(),
            Some("Command requires elevated privileges")
        );
    }

    #[test]
    fn test_plain_commands_are_safe_and_quiet() {
        let f = filter();
        for cmd in ["ls -la", "git status", "echo hello", "cat README.md", "format the report"] {
            assert!(f.is_safe(cmd));
            assert!(!f.needs_confirmation(cmd), "'{}' should not need confirmation", cmd);
            assert!(matches!(f.analyze(cmd), CommandSafety::Safe));
        }
    }

    #[test]
    fn test_analyze_orders_block_before_warn() {
        let f = filter();
        assert!(matches!(f.analyze("rm -rf /"), CommandSafety::Block(_)));
        assert!(matches!(f.analyze("rm notes.txt"), CommandSafety::Warn(_)));
    }

    #[test]
    fn test_safe_alternative() {
        let f = filter();
        assert_eq!(f.safe_alternative("rm -rf build"), Some("rm -i"));
        assert_eq!(f.safe_alternative("kill -9 4242"), Some("kill -TERM"));
        assert_eq!(f.safe_alternative("chmod 777 run.sh"), Some("chmod 755"));
        assert_eq!(f.safe_alternative("ls"), None);
    }

    #[test]
    fn test_reversibility_is_advisory() {
        let f = filter();
        assert!(!f.is_reversible("rm notes.txt"));
        assert!(!f.is_reversible("dd if=a of=b"));
        assert!(f.is_reversible("mv a b"));
        assert!(f.is_reversible("touch x"));
    }
}
