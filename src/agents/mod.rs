//! Guardrail agents and the pipeline that chains them.
//!
//! An [`Agent`] looks at the current text of a request and returns an
//! [`AgentOutcome`]: handle it (stop with a response), rewrite it, warn about
//! it, or pass it on. [`AgentPipeline`] runs agents in priority order and stops
//! at the first failure or the first agent that handles the request.

mod pipeline;
mod router;
mod security;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::context::RequestContext;

pub use pipeline::{
    AgentPipeline, DEFAULT_AGENT_TIMEOUT, FailedStage, PipelineError, PipelineMetadata,
    PipelineResult, StageRecord, StageStatus,
};
pub use router::CommandRouterAgent;
pub use security::SecurityAgent;

/// Free-form diagnostic data attached to an outcome.
pub type Metadata = serde_json::Map<String, Value>;

/// Why an agent could not produce an outcome.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The result of one agent looking at a request.
///
/// A handled outcome always carries a response; the constructors are the only
/// way to build one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutcome {
    handled: bool,
    response: Option<String>,
    rewritten: Option<String>,
    metadata: Metadata,
}

impl AgentOutcome {
    /// Stop the pipeline and show `response`.
    pub fn handled(response: impl Into<String>) -> Self {
        Self {
            handled: true,
            response: Some(response.into()),
            ..Self::default()
        }
    }

    /// Let the request continue with `text` as its current text.
    pub fn pass(text: impl Into<String>) -> Self {
        Self {
            rewritten: Some(text.into()),
            ..Self::default()
        }
    }

    /// Show `response` to the user but still hand `text` on for dispatch.
    pub fn warn(response: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            rewritten: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub fn rewritten(&self) -> Option<&str> {
        self.rewritten.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

/// One stage of the guardrail pipeline.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique within a pipeline.
    fn name(&self) -> &str;

    /// Lower runs earlier.
    fn priority(&self) -> i32;

    /// Cheap pre-check; agents that return false are skipped.
    fn should_handle(&self, _text: &str, _ctx: &RequestContext) -> bool {
        true
    }

    async fn process(&self, text: &str, ctx: &RequestContext) -> Result<AgentOutcome, AgentError>;
}
