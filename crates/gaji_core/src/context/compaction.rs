//! Summarization of aging conversation history
//!
//! When a conversation outgrows the optimization threshold, everything but the
//! most recent messages is folded into a single summary message. Summaries are
//! best-effort: the generator failing must not fail the context build.

use std::sync::Arc;
use std::time::Duration;

use crate::config::GajiConfig;
use crate::message::{ConversationMessage, transcript};
use crate::model::{GenerationError, GenerationOptions, TextGenerator};
use crate::resilience::{BreakerError, CircuitBreaker, CircuitBreakerSnapshot};
use crate::utils::ErrorChain;

/// Prefix of the synthetic summary message
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary] ";

/// Used in place of a summary whenever one cannot be generated
pub const SUMMARY_FALLBACK: &str = "Earlier conversation could not be summarized. \
     Key discussion points were preserved in recent messages.";

const GENERATOR_SERVICE: &str = "text_generator";

#[derive(Debug)]
pub struct Compactor {
    generator: Arc<dyn TextGenerator>,
    breaker: CircuitBreaker,
    timeout: Duration,
    options: GenerationOptions,
    target_words: usize,
}

impl Compactor {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &GajiConfig) -> Self {
        Self {
            generator,
            breaker: CircuitBreaker::new(GENERATOR_SERVICE, &config.resilience.circuit_breaker),
            timeout: config.resilience.timeouts.generation(),
            options: GenerationOptions {
                temperature: Some(config.generation.summary_temperature),
                max_tokens: Some(config.generation.summary_max_tokens),
            },
            target_words: config.generation.summary_target_words,
        }
    }

    fn summary_prompt(&self, messages: &[ConversationMessage]) -> String {
        format!(
            "Summarize this conversation history in approximately {} words. \
             Focus on key plot points, character decisions, and important context. \
             Maintain chronological order and preserve critical details:\n\n{}",
            self.target_words,
            transcript(messages)
        )
    }

    /// Summary text for `messages`, or [`SUMMARY_FALLBACK`]
    pub async fn summarize(&self, messages: &[ConversationMessage]) -> String {
        let prompt = self.summary_prompt(messages);

        let outcome = self
            .breaker
            .call(|| async {
                match tokio::time::timeout(
                    self.timeout,
                    self.generator.generate(&prompt, &self.options),
                )
                .await
                {
                    Ok(Ok(summary)) if summary.trim().is_empty() => {
                        Err(GenerationError::EmptyResponse)
                    }
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Request(format!(
                        "timed out after {:?}",
                        self.timeout
                    ))),
                }
            })
            .await;

        match outcome {
            Ok(summary) => {
                tracing::info!(
                    original_message_count = messages.len(),
                    summary_length = summary.len(),
                    "messages summarized"
                );
                summary.trim().to_string()
            }
            Err(BreakerError::Open { retry_after, .. }) => {
                tracing::warn!(?retry_after, "generator breaker open, using fallback summary");
                SUMMARY_FALLBACK.to_string()
            }
            Err(BreakerError::Inner(e)) => {
                tracing::warn!(
                    error = %ErrorChain(&e),
                    message_count = messages.len(),
                    "summarization failed, using fallback summary"
                );
                SUMMARY_FALLBACK.to_string()
            }
        }
    }

    /// Fold all but the last `keep_recent` messages into one summary message.
    ///
    /// Histories no longer than `keep_recent` come back unchanged.
    pub async fn compact(
        &self,
        mut messages: Vec<ConversationMessage>,
        keep_recent: usize,
    ) -> Vec<ConversationMessage> {
        if messages.len() <= keep_recent {
            return messages;
        }

        let recent = messages.split_off(messages.len() - keep_recent);
        let summary = self.summarize(&messages).await;

        tracing::info!(
            summarized = messages.len(),
            kept = recent.len(),
            "conversation history compacted"
        );

        let mut compacted = Vec::with_capacity(recent.len() + 1);
        compacted.push(summary_message(&summary));
        compacted.extend(recent);
        compacted
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }
}

/// The synthetic system message carrying a summary
pub fn summary_message(summary: &str) -> ConversationMessage {
    ConversationMessage::synthetic(format!("{}{}", SUMMARY_PREFIX, summary))
}
