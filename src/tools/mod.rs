//! Policy-gated access to external tools.
//!
//! Every call is validated against the tool section of the rule document
//! before the backend is touched. A denied or approval-required call never
//! reaches the backend.

mod local;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audit::AuditLogger;
use crate::context::RequestContext;
use crate::policy::{PolicyDecision, PolicyEngine, PolicyVerdict, Violation};
use crate::security::{ExecutionDecision, gate_command};

pub use local::LocalToolBackend;

pub const POLICY_VIOLATION: &str = "POLICY_VIOLATION";
pub const APPROVAL_REQUIRED: &str = "APPROVAL_REQUIRED";
pub const TIMEOUT: &str = "TIMEOUT";
pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: String,
    pub message: String,
}

/// What a tool call produced. Failures are data: callers show them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ToolFailure {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    fn size(&self) -> usize {
        self.result
            .as_ref()
            .map(|r| r.to_string().len())
            .unwrap_or_default()
    }
}

/// Something that can actually run tools.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>>;

    async fn call(&self, name: &str, parameters: &Value, ctx: &RequestContext) -> Result<Value>;
}

pub struct ToolGateway {
    backend: Arc<dyn ToolBackend>,
    policy: Arc<PolicyEngine>,
    audit: Option<Arc<AuditLogger>>,
    dry_run: bool,
}

impl ToolGateway {
    pub fn new(backend: Arc<dyn ToolBackend>, policy: Arc<PolicyEngine>) -> Self {
        Self {
            backend,
            policy,
            audit: None,
            dry_run: false,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Validate and audit calls as usual, but never invoke the backend.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn call_tool(&self, name: &str, parameters: Value, ctx: &RequestContext) -> ToolResult {
        let mut decision = self.policy.validate_tool_call(name);
        if let Some(violation) = self.path_violation(&parameters, ctx) {
            decision.violations.push(violation);
            decision.verdict = PolicyVerdict::Deny;
        }

        match gate_command(name, &decision) {
            ExecutionDecision::Deny { .. } => return self.blocked(name, &parameters, &decision, ctx),
            ExecutionDecision::RequireConfirmation { .. } => {
                let reason = decision.summary();
                info!("Tool call '{}' requires approval: {}", name, reason);
                if let Some(audit) = &self.audit {
                    audit.requires_approval(ctx, &format!("tool:{}", name), &reason);
                }
                return ToolResult::failure(
                    APPROVAL_REQUIRED,
                    format!("Tool call requires approval: {}", reason),
                );
            }
            ExecutionDecision::DryRun => return self.simulate(name, parameters, ctx),
            ExecutionDecision::Execute => {}
        }

        if self.dry_run {
            return self.simulate(name, parameters, ctx);
        }

        let limit = self.policy.tool_timeout(name);
        let started = Instant::now();
        debug!("Calling tool '{}' with a {:?} limit", name, limit);
        let result = match timeout(limit, self.backend.call(name, &parameters, ctx)).await {
            Ok(Ok(value)) => ToolResult::success(value),
            Ok(Err(e)) => {
                warn!("Tool '{}' failed: {:#}", name, e);
                ToolResult::failure(EXECUTION_ERROR, format!("Tool execution failed: {:#}", e))
            }
            Err(_) => {
                warn!("Tool '{}' timed out after {:?}", name, limit);
                ToolResult::failure(
                    TIMEOUT,
                    format!("Tool call timed out after {} seconds", limit.as_secs()),
                )
            }
        };

        if let Some(audit) = &self.audit {
            audit.tool_call(ctx, name, &parameters, result.error_code(), result.size(), started.elapsed());
        }
        result
    }

    /// Backend tools the policy would not deny outright.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        let tools = self.backend.list_tools().await?;
        Ok(tools
            .into_iter()
            .filter(|tool| self.policy.validate_tool_call(&tool.name).verdict != PolicyVerdict::Deny)
            .collect())
    }

    /// A forbidden-path violation for the call's `path` parameter.
    fn path_violation(&self, parameters: &Value, ctx: &RequestContext) -> Option<Violation> {
        let path = parameters.get("path").and_then(Value::as_str)?;
        self.policy
            .path_violation(path, Path::new(&ctx.working_directory))
    }

    fn blocked(
        &self,
        name: &str,
        parameters: &Value,
        decision: &PolicyDecision,
        ctx: &RequestContext,
    ) -> ToolResult {
        let reason = decision.summary();
        warn!("Tool call '{}' blocked: {}", name, reason);
        if let Some(audit) = &self.audit {
            let rule = decision
                .violations
                .first()
                .map(|v| v.rule_name.as_str())
                .unwrap_or("unknown");
            audit.tool_blocked(ctx, name, parameters, &reason, rule);
        }
        ToolResult::failure(POLICY_VIOLATION, format!("Tool call blocked by policy: {}", reason))
    }

    fn simulate(&self, name: &str, parameters: Value, ctx: &RequestContext) -> ToolResult {
        let result = ToolResult::success(json!({
            "dry_run": true,
            "tool_name": name,
            "parameters": parameters,
            "message": "Dry run - tool would be executed",
        }));
        if let Some(audit) = &self.audit {
            audit.tool_call(ctx, name, &parameters, None, result.size(), std::time::Duration::ZERO);
        }
        result
    }
}
