//! Model hand-off for input routed away from the shell.
//!
//! Callers pass text that has already been through the sensitive-data
//! filter; this module only talks to the model.

mod client;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;

pub use client::{DEFAULT_MODEL, OpenAiClient};
pub use prompt::PromptContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Model name, as recorded in the audit log.
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str, ctx: &PromptContext) -> Result<ModelReply>;
}
