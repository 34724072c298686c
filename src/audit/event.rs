use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::policy::Severity;

pub const EVENT_SOURCE: &str = "rusty-gate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    CommandExecuted,
    CommandBlocked,
    CommandRequiresApproval,
    ModelInteraction,
    ToolCall,
    ToolBlocked,
    PolicyViolation,
    SecurityAlert,
    SessionStart,
    SessionEnd,
    ConfigChange,
    Error,
}

impl AuditEventKind {
    /// Kinds that count as alerts when written at error severity or above.
    pub fn is_alert(self) -> bool {
        matches!(
            self,
            Self::SecurityAlert | Self::CommandBlocked | Self::PolicyViolation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl From<Severity> for AuditSeverity {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Self::Info,
            Severity::Medium => Self::Warning,
            Severity::High => Self::Error,
            Severity::Critical => Self::Critical,
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub iso_timestamp: String,
    pub event_type: AuditEventKind,
    pub session_id: String,
    pub user: String,
    pub working_directory: String,
    pub severity: AuditSeverity,
    pub event_data: Value,
    pub source: String,
}

impl AuditEvent {
    pub fn new(
        kind: AuditEventKind,
        severity: AuditSeverity,
        session_id: &str,
        ctx: &RequestContext,
        event_data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            timestamp: epoch_seconds(now),
            iso_timestamp: now.with_timezone(&Local).to_rfc3339(),
            event_type: kind,
            session_id: session_id.to_string(),
            user: ctx.user.clone(),
            working_directory: ctx.working_directory.clone(),
            severity,
            event_data,
            source: EVENT_SOURCE.to_string(),
        }
    }
}

pub(super) fn epoch_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
