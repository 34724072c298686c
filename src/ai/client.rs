use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{Client, config::OpenAIConfig};
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::debug;

use super::prompt::{self, PromptContext};
use super::{ModelClient, ModelReply};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Chat-completions client. Credentials come from the usual `OPENAI_*`
/// variables read by `async-openai`.
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    fn messages(prompt: &str, ctx: &PromptContext) -> Result<Vec<ChatCompletionRequestMessage>> {
        let mut messages: Vec<ChatCompletionRequestMessage> =
            vec![ChatCompletionRequestSystemMessageArgs::default()
                .content(prompt::SYSTEM_PROMPT)
                .build()?
                .into()];
        if let Some(context) = prompt::build_context_message(ctx) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(context)
                    .build()?
                    .into(),
            );
        }
        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()?
                .into(),
        );
        Ok(messages)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, ctx: &PromptContext) -> Result<ModelReply> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::messages(prompt, ctx)?)
            .build()
            .context("failed to build chat request")?;

        debug!("Sending chat request to {}", self.model);
        let response = timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| anyhow!("model request timed out after {:?}", self.request_timeout))?
            .context("chat request failed")?;

        let text = response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();
        Ok(ModelReply {
            text,
            tokens_used: response.usage.map(|u| u.total_tokens),
        })
    }
}
