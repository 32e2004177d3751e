use async_trait::async_trait;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, MessageContent};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::config::GenerationConfig;

/// Characters per token used when no tokenizer is reachable
pub const CHARS_PER_TOKEN: usize = 4;

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(content: &str) -> usize {
    content.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),

    #[error("model returned no text")]
    EmptyResponse,

    #[error("token counting unavailable: {0}")]
    TokenCount(String),
}

/// Sampling parameters for a single generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationOptions {
    pub fn to_chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::default();
        if let Some(temperature) = self.temperature {
            options = options.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        options
    }
}

/// A language model that can count tokens and generate text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync + Debug {
    /// Count tokens in `content` the way the model would
    async fn count_tokens(&self, content: &str) -> Result<usize, GenerationError>;

    /// Generate a completion for a single user prompt
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}

/// [`TextGenerator`] over a genai client
///
/// API keys come from the environment (`GEMINI_API_KEY`, `OPENAI_API_KEY`, ...)
/// as genai resolves them for the configured model.
#[derive(Debug)]
pub struct GenAiGenerator {
    client: genai::Client,
    model: String,
}

impl GenAiGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_client(genai::Client::default(), model)
    }

    /// Generator for the configured model
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(config.model.clone())
    }

    pub fn with_client(client: genai::Client, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for GenAiGenerator {
    /// genai exposes no tokenizer, so this is the character estimate
    async fn count_tokens(&self, content: &str) -> Result<usize, GenerationError> {
        Ok(estimate_tokens(content))
    }

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let request = ChatRequest::new(vec![ChatMessage::user(prompt.to_string())]);
        let chat_options = options.to_chat_options();

        let response = match self
            .client
            .exec_chat(&self.model, request, Some(&chat_options))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(model = %self.model, error = %e, "genai request failed");
                return Err(GenerationError::Request(e.to_string()));
            }
        };

        let text = response
            .content
            .into_iter()
            .filter_map(|content| match content {
                MessageContent::Text(text) => Some(text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text)
    }
}
