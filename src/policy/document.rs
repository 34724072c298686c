//! The rule document: five TOML sections, each filled with defaults when absent.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PolicyError;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub version: String,
    pub security: SecuritySettings,
    pub command_policies: CommandPolicies,
    pub path_policies: PathPolicies,
    #[serde(alias = "mcp_policies")]
    pub tool_policies: ToolPolicies,
    pub audit: AuditSettings,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            security: SecuritySettings::default(),
            command_policies: CommandPolicies::default(),
            path_policies: PathPolicies::default(),
            tool_policies: ToolPolicies::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl PolicyDocument {
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = fs::read_to_string(path).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| PolicyError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), PolicyError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PolicyError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub enable_command_filtering: bool,
    pub enable_path_restrictions: bool,
    pub enable_audit_logging: bool,
    pub require_approval_for_destructive: bool,
    pub block_privilege_escalation: bool,
    pub max_command_length: usize,
    pub timeout_seconds: u64,
    pub max_output_size: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_command_filtering: true,
            enable_path_restrictions: true,
            enable_audit_logging: true,
            require_approval_for_destructive: true,
            block_privilege_escalation: true,
            max_command_length: 1000,
            timeout_seconds: 30,
            max_output_size: 1_048_576,
        }
    }
}

/// Literal-or-wildcard command patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandPolicies {
    /// Empty means every command not explicitly forbidden is allowed.
    pub allowed_commands: Vec<String>,
    pub forbidden_commands: Vec<String>,
    pub require_approval: Vec<String>,
    pub dry_run_only: Vec<String>,
}

impl Default for CommandPolicies {
    fn default() -> Self {
        Self {
            allowed_commands: Vec::new(),
            forbidden_commands: strings(&[
                "sudo su -",
                "passwd root",
                "rm -rf /",
                "rm -rf *",
                "dd if=/dev/zero",
                "mkfs",
                "fdisk",
                "parted",
                "iptables -F",
                "ufw --force",
                "init 0",
                "init 6",
                "shutdown -h now",
                "reboot",
                "halt",
                "poweroff",
            ]),
            require_approval: strings(&[
                "rm -rf",
                "chmod 777",
                "chown root",
                "systemctl stop",
                "service stop",
                "kill -9",
                "killall",
                "crontab",
            ]),
            dry_run_only: strings(&["rm -rf *", "chmod -R 777", "chown -R root"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathPolicies {
    pub forbidden_paths: Vec<String>,
    pub read_only_paths: Vec<String>,
    pub allowed_write_paths: Vec<String>,
}

impl Default for PathPolicies {
    fn default() -> Self {
        Self {
            forbidden_paths: strings(&[
                "/etc/shadow",
                "/etc/passwd",
                "/etc/sudoers",
                "/boot",
                "/sys",
                "/proc/sys",
                "/dev/sd*",
                "/dev/hd*",
            ]),
            read_only_paths: strings(&["/etc", "/usr", "/opt", "/var/log"]),
            allowed_write_paths: strings(&["~", "/tmp", "/var/tmp", "/home"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPolicies {
    pub allowed_tools: Vec<String>,
    pub forbidden_tools: Vec<String>,
    /// Substrings; any tool whose name contains one needs approval.
    pub require_approval_tools: Vec<String>,
    /// Seconds per tool name, with a `default` entry.
    pub tool_timeouts: BTreeMap<String, u64>,
}

impl Default for ToolPolicies {
    fn default() -> Self {
        Self {
            allowed_tools: strings(&[
                "list_dir",
                "read_file",
                "git_status",
                "git_diff",
                "git_log",
                "find_files",
                "grep_files",
            ]),
            forbidden_tools: strings(&[
                "run_shell",
                "execute_command",
                "write_file",
                "delete_file",
                "modify_system",
                "install_package",
                "change_permissions",
            ]),
            require_approval_tools: strings(&["run", "execute", "write", "delete", "modify"]),
            tool_timeouts: BTreeMap::from([
                ("default".to_string(), 10),
                ("run".to_string(), 30),
                ("execute".to_string(), 30),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub log_all_commands: bool,
    pub log_ai_interactions: bool,
    pub log_policy_violations: bool,
    pub log_file: String,
    pub max_log_size: u64,
    pub redact_sensitive_data: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_all_commands: true,
            log_ai_interactions: true,
            log_policy_violations: true,
            log_file: "~/.rusty-gate/audit.jsonl".to_string(),
            max_log_size: 10_485_760,
            redact_sensitive_data: true,
        }
    }
}
