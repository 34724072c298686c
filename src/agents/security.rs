//! The first agent in the pipeline: command safety, sensitive data, policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::{Agent, AgentError, AgentOutcome};
use crate::audit::AuditLogger;
use crate::context::RequestContext;
use crate::policy::{PolicyDecision, PolicyEngine, PolicyVerdict};
use crate::security::{
    CommandSafetyFilter, ExecutionDecision, FallbackGuard, FallbackHit, SensitiveDataFilter,
    gate_command,
};

pub struct SecurityAgent {
    safety: Option<Arc<CommandSafetyFilter>>,
    sensitive: Option<Arc<SensitiveDataFilter>>,
    fallback: Option<FallbackGuard>,
    policy: Option<Arc<PolicyEngine>>,
    audit: Option<Arc<AuditLogger>>,
}

impl SecurityAgent {
    pub const NAME: &'static str = "Security Agent";
    pub const PRIORITY: i32 = 10;

    /// A missing filter is covered by the built-in fallback patterns.
    pub fn new(
        safety: Option<Arc<CommandSafetyFilter>>,
        sensitive: Option<Arc<SensitiveDataFilter>>,
    ) -> Self {
        let fallback = if safety.is_none() || sensitive.is_none() {
            warn!("Security filters unavailable, using built-in fallback patterns");
            Some(FallbackGuard::new())
        } else {
            None
        };
        Self {
            safety,
            sensitive,
            fallback,
            policy: None,
            audit: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn check_safety(&self, text: &str, ctx: &RequestContext) -> Option<AgentOutcome> {
        let safety = self.safety.as_ref()?;

        if let Some(reason) = safety.forbidden_reason(text) {
            if let Some(audit) = &self.audit {
                audit.command_blocked(ctx, text, &reason, "command_safety");
            }
            let mut response = format!(
                "SECURITY BLOCKED: '{}' has been blocked for security reasons.\n\
                 Reason: {}\n",
                text, reason
            );
            if let Some(alternative) = safety.safe_alternative(text) {
                response.push_str(&format!("Safer alternative: {}\n", alternative));
            }
            response.push_str(
                "Break the operation into smaller steps, or use --dry-run where available.",
            );
            return Some(
                AgentOutcome::handled(response)
                    .with_metadata("security_action", "blocked")
                    .with_metadata("reason", reason),
            );
        }

        if let Some(reason) = safety.confirmation_reason(text) {
            let mut response = format!(
                "SECURITY WARNING: '{}' requires confirmation.\nReason: {}\n",
                text, reason
            );
            if !safety.is_reversible(text) {
                response.push_str("This operation cannot be undone.\n");
            }
            if let Some(alternative) = safety.safe_alternative(text) {
                response.push_str(&format!("Safer alternative: {}\n", alternative));
            }
            return Some(
                AgentOutcome::warn(response, text)
                    .with_metadata("security_action", "warning")
                    .with_metadata("reason", reason)
                    .with_metadata("requires_confirmation", true),
            );
        }

        None
    }

    fn check_sensitive(&self, text: &str, ctx: &RequestContext) -> Option<AgentOutcome> {
        let sensitive = self.sensitive.as_ref()?;

        let kinds = sensitive.detect(text);
        if kinds.is_empty() {
            return None;
        }
        let labels: Vec<&str> = kinds.iter().map(|k| k.label()).collect();

        if let Some(reason) = sensitive.block_reason(text) {
            if let Some(audit) = &self.audit {
                audit.command_blocked(ctx, text, &reason, "sensitive_data");
            }
            return Some(
                AgentOutcome::handled(format!(
                    "SENSITIVE DATA BLOCKED: the input contains sensitive information.\n\
                     Reason: {}\n\
                     Detected: {}\n\
                     Use placeholders or environment variables instead of real credentials.",
                    reason,
                    labels.join(", ")
                ))
                .with_metadata("security_action", "sensitive_blocked")
                .with_metadata("types", json!(labels))
                .with_metadata("reason", reason),
            );
        }

        let redacted = sensitive.redact(text);
        Some(
            AgentOutcome::warn(
                format!(
                    "SENSITIVE DATA FILTERED: {}. The filtered input will be processed.",
                    sensitive.redaction_summary(text, &redacted)
                ),
                redacted,
            )
            .with_metadata("security_action", "sensitive_filtered")
            .with_metadata("types", json!(labels)),
        )
    }

    /// With `deny_only`, approval and dry-run verdicts are neither reported
    /// nor audited; a caller already asking for confirmation uses this.
    fn check_policy(&self, text: &str, ctx: &RequestContext, deny_only: bool) -> Option<AgentOutcome> {
        let policy = self.policy.as_ref()?;
        let decision = policy.validate_command(text, ctx);
        let gate = gate_command(text, &decision);
        if deny_only && !matches!(gate, ExecutionDecision::Deny { .. }) {
            return None;
        }
        if decision.verdict != PolicyVerdict::Allow {
            self.audit_decision(policy, &decision, text, ctx);
        }

        let messages = bullet_list(decision.violations.iter().map(|v| v.message.as_str()));
        let violations = json!(decision.violations);

        match gate {
            ExecutionDecision::Execute => None,
            ExecutionDecision::Deny { reason } => Some(
                AgentOutcome::handled(format!(
                    "POLICY VIOLATION: '{}' is BLOCKED by security policy.\n\
                     Violations:\n{}\n\
                     Suggested actions:\n{}",
                    text,
                    messages,
                    bullet_list(decision.violations.iter().map(|v| v.remediation.as_str()))
                ))
                .with_metadata("security_action", "policy_denied")
                .with_metadata("reason", reason)
                .with_metadata("violations", violations),
            ),
            ExecutionDecision::RequireConfirmation { reason } => Some(
                AgentOutcome::warn(
                    format!(
                        "APPROVAL REQUIRED: '{}' requires approval.\n\
                         Policy violations:\n{}\n\
                         Confirm this operation is authorized before proceeding.",
                        text,
                        messages
                    ),
                    text,
                )
                .with_metadata("security_action", "approval_required")
                .with_metadata("reason", reason)
                .with_metadata("requires_confirmation", true)
                .with_metadata("violations", violations),
            ),
            ExecutionDecision::DryRun => Some(
                AgentOutcome::warn(
                    format!(
                        "DRY RUN ONLY: '{}' is only allowed as a dry run.\n{}\n\
                         Add --dry-run or an equivalent flag before confirming.",
                        text,
                        messages
                    ),
                    text,
                )
                .with_metadata("security_action", "dry_run_only")
                .with_metadata("requires_confirmation", true)
                .with_metadata("violations", violations),
            ),
        }
    }

    fn audit_decision(
        &self,
        policy: &PolicyEngine,
        decision: &PolicyDecision,
        text: &str,
        ctx: &RequestContext,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        if policy.should_audit_violations() {
            for violation in &decision.violations {
                audit.policy_violation(ctx, violation, text);
            }
        }
        match decision.verdict {
            PolicyVerdict::Deny => {
                let rule = decision
                    .violations
                    .first()
                    .map(|v| v.rule_name.as_str())
                    .unwrap_or("policy");
                audit.command_blocked(ctx, text, &decision.summary(), rule);
            }
            PolicyVerdict::RequireApproval | PolicyVerdict::DryRunOnly => {
                audit.requires_approval(ctx, text, &decision.summary());
            }
            PolicyVerdict::Allow => {}
        }
    }

    /// The first terminal outcome of the checks after command safety.
    fn later_block(&self, text: &str, ctx: &RequestContext) -> Option<AgentOutcome> {
        self.check_sensitive(text, ctx)
            .filter(AgentOutcome::is_handled)
            .or_else(|| self.check_policy(text, ctx, true))
            .or_else(|| self.check_fallback(text, ctx))
    }

    fn check_fallback(&self, text: &str, ctx: &RequestContext) -> Option<AgentOutcome> {
        let hit = self.fallback.as_ref()?.check(text)?;
        let (reason, response, action) = match hit {
            FallbackHit::Destructive { pattern } => (
                format!("Matches dangerous pattern: {}", pattern),
                format!(
                    "SECURITY BLOCKED: '{}' contains potentially dangerous patterns.\n\
                     Blocked pattern: {}",
                    text, pattern
                ),
                "blocked_fallback",
            ),
            FallbackHit::Credential { label } => (
                format!("Contains {}", label.to_lowercase()),
                format!(
                    "SENSITIVE DATA BLOCKED: the input contains {} and has been blocked.",
                    label.to_lowercase()
                ),
                "sensitive_blocked_fallback",
            ),
        };
        if let Some(audit) = &self.audit {
            audit.command_blocked(ctx, text, &reason, "fallback");
        }
        Some(
            AgentOutcome::handled(response)
                .with_metadata("security_action", action)
                .with_metadata("reason", reason),
        )
    }
}

fn bullet_list<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .map(|item| format!("  - {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Agent for SecurityAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        Self::PRIORITY
    }

    async fn process(&self, text: &str, ctx: &RequestContext) -> Result<AgentOutcome, AgentError> {
        let outcome = match self.check_safety(text, ctx) {
            Some(blocked) if blocked.is_handled() => blocked,
            // A confirmation warning only stands if no later check blocks.
            Some(warning) => match self.later_block(text, ctx) {
                Some(blocked) => blocked,
                None => {
                    if let Some(audit) = &self.audit {
                        let reason = warning
                            .metadata()
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        audit.requires_approval(ctx, text, reason);
                    }
                    warning
                }
            },
            None => self
                .check_sensitive(text, ctx)
                .or_else(|| self.check_policy(text, ctx, false))
                .or_else(|| self.check_fallback(text, ctx))
                .unwrap_or_else(|| {
                    AgentOutcome::pass(text)
                        .with_metadata("security_action", "passed")
                        .with_metadata(
                            "checks",
                            json!(["command_safety", "sensitive_data", "policy"]),
                        )
                }),
        };
        Ok(outcome)
    }
}
