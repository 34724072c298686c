use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{Agent, AgentError, AgentOutcome, Metadata};
use crate::audit::AuditLogger;
use crate::context::{Request, RequestContext};

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("an agent named '{0}' is already registered")]
    DuplicateAgent(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Skipped,
    Passed,
    Warned,
    Handled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub agent: String,
    pub priority: i32,
    pub status: StageStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStage {
    pub agent: String,
    pub priority: i32,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetadata {
    /// Every agent considered, in the order they ran.
    pub stages: Vec<StageRecord>,
    pub handled_by: Option<String>,
    pub failed: Option<FailedStage>,
    pub processor_error: Option<String>,
    /// Metadata from every agent that ran; later agents win on key conflicts.
    pub annotations: Metadata,
}

impl PipelineMetadata {
    fn completed(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status != StageStatus::Skipped && s.status != StageStatus::Failed)
            .map(|s| s.agent.as_str())
            .collect()
    }

    pub fn annotation_str(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).and_then(|v| v.as_str())
    }

    pub fn annotation_flag(&self, key: &str) -> bool {
        self.annotations
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// What the pipeline decided for one line of input.
///
/// - `success == false`: an agent (or the pipeline itself) failed; `response`
///   is the diagnostic and nothing may be dispatched.
/// - `response` set and `rewritten == None`: an agent handled the request.
/// - `response` set and `rewritten` set: show the response, then consider
///   dispatching `rewritten`.
/// - `response == None`: nothing intercepted; dispatch `rewritten`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub response: Option<String>,
    pub rewritten: Option<String>,
    pub metadata: PipelineMetadata,
}

impl PipelineResult {
    pub fn is_handled(&self) -> bool {
        self.success && self.response.is_some() && self.rewritten.is_none()
    }
}

pub struct AgentPipeline {
    agents: Vec<Arc<dyn Agent>>,
    agent_timeout: Duration,
    audit: Option<Arc<AuditLogger>>,
}

impl Default for AgentPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_TIMEOUT)
    }
}

impl AgentPipeline {
    pub fn new(agent_timeout: Duration) -> Self {
        Self {
            agents: Vec::new(),
            agent_timeout,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Add an agent, keeping the list sorted by priority.
    ///
    /// Agents with equal priority run in registration order.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), PipelineError> {
        if self.agents.iter().any(|a| a.name() == agent.name()) {
            return Err(PipelineError::DuplicateAgent(agent.name().to_string()));
        }
        let at = self
            .agents
            .partition_point(|a| a.priority() <= agent.priority());
        info!(
            "Registered agent '{}' with priority {}",
            agent.name(),
            agent.priority()
        );
        self.agents.insert(at, agent);
        Ok(())
    }

    /// Register `agent`, replacing any agent with the same name.
    pub fn replace(&mut self, agent: Arc<dyn Agent>) -> Option<Arc<dyn Agent>> {
        let previous = self.remove(agent.name());
        let at = self
            .agents
            .partition_point(|a| a.priority() <= agent.priority());
        self.agents.insert(at, agent);
        previous
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Agent>> {
        let index = self.agents.iter().position(|a| a.name() == name)?;
        Some(self.agents.remove(index))
    }

    /// `(name, priority)` of every agent, in run order.
    pub fn agents(&self) -> Vec<(&str, i32)> {
        self.agents.iter().map(|a| (a.name(), a.priority())).collect()
    }

    /// Run `text` through every agent.
    ///
    /// Never panics and never returns an error: every failure becomes a
    /// `success == false` result that preserves the original input.
    pub async fn process(&self, text: &str, ctx: &RequestContext) -> PipelineResult {
        match AssertUnwindSafe(self.run(text, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic);
                error!("Pipeline failed outside of any agent: {}", message);
                if let Some(audit) = &self.audit {
                    audit.error(
                        ctx,
                        "processor_failure",
                        &message,
                        json!({ "original_input": text }),
                    );
                }
                PipelineResult {
                    success: false,
                    response: Some(format!(
                        "Processor failure: {}\nOriginal input preserved: {}",
                        message, text
                    )),
                    rewritten: None,
                    metadata: PipelineMetadata {
                        processor_error: Some(message),
                        ..PipelineMetadata::default()
                    },
                }
            }
        }
    }

    async fn run(&self, text: &str, ctx: &RequestContext) -> PipelineResult {
        let mut request = Request::new(text, ctx.clone());
        let mut metadata = PipelineMetadata::default();

        for agent in &self.agents {
            let (name, priority) = (agent.name().to_string(), agent.priority());

            let result = match panic::catch_unwind(AssertUnwindSafe(|| {
                agent.should_handle(&request.current, &request.context)
            })) {
                Ok(false) => {
                    debug!("Agent '{}' skipped", name);
                    metadata.stages.push(StageRecord {
                        agent: name,
                        priority,
                        status: StageStatus::Skipped,
                    });
                    continue;
                }
                Ok(true) => self.call(agent.as_ref(), &request).await,
                Err(panic) => Err(AgentError::Panicked(panic_message(panic))),
            };

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => return self.fail(&request, metadata, name, priority, e),
            };

            metadata
                .annotations
                .extend(outcome.metadata().iter().map(|(k, v)| (k.clone(), v.clone())));

            if outcome.is_handled() {
                debug!("Agent '{}' handled the request", name);
                metadata.stages.push(StageRecord {
                    agent: name.clone(),
                    priority,
                    status: StageStatus::Handled,
                });
                metadata.handled_by = Some(name);
                return PipelineResult {
                    success: true,
                    response: outcome.response().map(str::to_string),
                    rewritten: None,
                    metadata,
                };
            }

            if let Some(rewritten) = outcome.rewritten() {
                request.rewrite(rewritten.to_string());
            }

            if let Some(response) = outcome.response() {
                metadata.stages.push(StageRecord {
                    agent: name,
                    priority,
                    status: StageStatus::Warned,
                });
                return PipelineResult {
                    success: true,
                    response: Some(response.to_string()),
                    rewritten: Some(request.current),
                    metadata,
                };
            }

            metadata.stages.push(StageRecord {
                agent: name,
                priority,
                status: StageStatus::Passed,
            });
        }

        PipelineResult {
            success: true,
            response: None,
            rewritten: Some(request.current),
            metadata,
        }
    }

    async fn call(&self, agent: &dyn Agent, request: &Request) -> Result<AgentOutcome, AgentError> {
        let work = AssertUnwindSafe(agent.process(&request.current, &request.context)).catch_unwind();
        match timeout(self.agent_timeout, work).await {
            Err(_) => Err(AgentError::Timeout(self.agent_timeout)),
            Ok(Err(panic)) => Err(AgentError::Panicked(panic_message(panic))),
            Ok(Ok(result)) => result,
        }
    }

    fn fail(
        &self,
        request: &Request,
        mut metadata: PipelineMetadata,
        name: String,
        priority: i32,
        err: AgentError,
    ) -> PipelineResult {
        let completed = metadata.completed().join(", ");
        let completed = if completed.is_empty() {
            "none".to_string()
        } else {
            completed
        };
        warn!("Agent '{}' (priority {}) failed: {}", name, priority, err);

        if let Some(audit) = &self.audit {
            audit.error(
                &request.context,
                "agent_failure",
                &format!("Agent '{}' failed: {}", name, err),
                json!({
                    "agent": name,
                    "priority": priority,
                    "original_input": request.original(),
                    "completed_agents": completed,
                }),
            );
        }

        let response = format!(
            "Agent '{}' (priority {}) failed: {}\n\
             Processing stopped; nothing was executed.\n\
             Original input: {}\n\
             Agents already run: {}",
            name,
            priority,
            err,
            request.original(),
            completed
        );

        metadata.stages.push(StageRecord {
            agent: name.clone(),
            priority,
            status: StageStatus::Failed,
        });
        metadata.failed = Some(FailedStage {
            agent: name,
            priority,
            error: err.to_string(),
        });

        PipelineResult {
            success: false,
            response: Some(response),
            rewritten: None,
            metadata,
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
