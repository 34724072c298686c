//! Execution gating with policy verdict enforcement.
//!
//! Every place that is about to run something (a shell command, an external
//! tool call) turns its [`PolicyDecision`] into an [`ExecutionDecision`]
//! here, so a verdict means the same thing everywhere.

use crate::policy::{PolicyDecision, PolicyVerdict};

/// Result of passing a command through the security gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionDecision {
    /// Run it now
    Execute,
    /// Only a simulated run is allowed
    DryRun,
    /// Ask the user before running
    RequireConfirmation { reason: String },
    /// Never run it
    Deny { reason: String },
}

impl ExecutionDecision {
    pub fn is_execute(&self) -> bool {
        matches!(self, Self::Execute)
    }
}

/// Map a policy decision for `subject` onto what the caller may do with it.
///
/// # Examples
/// ```
/// use rusty_gate::policy::PolicyDecision;
/// use rusty_gate::security::{ExecutionDecision, gate_command};
///
/// let decision = gate_command("ls -la", &PolicyDecision::allow());
/// assert_eq!(decision, ExecutionDecision::Execute);
/// ```
pub fn gate_command(subject: &str, decision: &PolicyDecision) -> ExecutionDecision {
    let detail = if decision.violations.is_empty() {
        String::new()
    } else {
        format!(": {}", decision.summary())
    };

    match decision.verdict {
        PolicyVerdict::Allow => ExecutionDecision::Execute,
        PolicyVerdict::DryRunOnly => ExecutionDecision::DryRun,
        PolicyVerdict::RequireApproval => ExecutionDecision::RequireConfirmation {
            reason: format!("'{}' requires approval before execution{}", subject, detail),
        },
        PolicyVerdict::Deny => ExecutionDecision::Deny {
            reason: format!("'{}' is denied by policy{}", subject, detail),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContext;
    use crate::policy::{PolicyDocument, PolicyEngine};

    fn decide(cmd: &str) -> PolicyDecision {
        let engine = PolicyEngine::new(PolicyDocument::default()).unwrap();
        engine.validate_command(cmd, &RequestContext::new("/tmp", "tester", "s1"))
    }

    #[test]
    fn test_gate_allow_verdict() {
        assert_eq!(gate_command("pwd", &decide("pwd")), ExecutionDecision::Execute);
        assert!(gate_command("git status", &decide("git status")).is_execute());
    }

    #[test]
    fn test_gate_require_confirmation_verdict() {
        match gate_command("killall node", &decide("killall node")) {
            ExecutionDecision::RequireConfirmation { reason } => {
                assert!(reason.contains("killall node"));
                assert!(reason.contains("requires approval"));
                assert!(reason.contains("Command requires approval: killall"));
            }
            other => panic!("Expected RequireConfirmation, got {:?}", other),
        }
    }

    #[test]
    fn test_gate_deny_verdict() {
        match gate_command("rm -rf /", &decide("rm -rf /")) {
            ExecutionDecision::Deny { reason } => {
                assert!(reason.contains("rm -rf /"));
                assert!(reason.contains("Critical security violation"));
            }
            other => panic!("Expected Deny, got {:?}", other),
        }
    }

    #[test]
    fn test_gate_dry_run_verdict() {
        for cmd in ["chmod -R 777 x", "chown -R root /srv"] {
            assert_eq!(gate_command(cmd, &decide(cmd)), ExecutionDecision::DryRun, "{}", cmd);
        }
    }
}
