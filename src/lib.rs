//! rusty-gate - a guarded command gateway between a user, a shell and a model.
//!
//! Every line of input passes an ordered pipeline of agents before anything
//! runs:
//! - the Security Agent blocks dangerous commands, redacts or blocks secrets
//!   and enforces the rule document
//! - the Command Router Agent answers shell builtins and decides whether the
//!   line is a shell command or a question for the model
//!
//! Tool calls from the model side go through the same rule document, and
//! every decision lands in an append-only JSON-lines audit log.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use rusty_gate::agents::{AgentPipeline, SecurityAgent};
//! use rusty_gate::context::RequestContext;
//! use rusty_gate::policy::{PolicyDocument, PolicyEngine};
//! use rusty_gate::security::{CommandSafetyFilter, SensitiveDataFilter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let policy = Arc::new(PolicyEngine::new(PolicyDocument::default())?);
//!     let agent = SecurityAgent::new(
//!         Some(Arc::new(CommandSafetyFilter::new()?)),
//!         Some(Arc::new(SensitiveDataFilter::new()?)),
//!     )
//!     .with_policy(policy);
//!
//!     let mut pipeline = AgentPipeline::new(Duration::from_secs(10));
//!     pipeline.register(Arc::new(agent))?;
//!
//!     let ctx = RequestContext::new("/home/alice", "alice", "session-1");
//!     let result = pipeline.process("rm -rf /", &ctx).await;
//!     assert!(result.is_handled());
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod ai;
pub mod app;
pub mod audit;
pub mod config;
pub mod context;
pub mod policy;
pub mod router;
pub mod security;
pub mod shell;
pub mod tools;
pub mod utils;

// Re-export commonly used types
pub use agents::{Agent, AgentOutcome, AgentPipeline, PipelineResult};
pub use app::{App, Output, SessionParts};
pub use audit::AuditLogger;
pub use policy::{PolicyDecision, PolicyEngine, PolicyVerdict};
