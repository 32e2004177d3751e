use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};

use crate::message::ConversationMessage;
use crate::model::{GenerationError, TextGenerator, estimate_tokens};
use crate::utils::ErrorChain;

/// Measures the token cost of a system instruction plus messages
#[derive(Debug, Clone)]
pub struct TokenCounter {
    generator: Arc<dyn TextGenerator>,
    timeout: Duration,
    max_concurrent: usize,
}

impl TokenCounter {
    pub fn new(generator: Arc<dyn TextGenerator>, timeout: Duration, max_concurrent: usize) -> Self {
        Self {
            generator,
            timeout,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Sum of the generator's counts over every segment, with at most
    /// `max_concurrent` requests in flight.
    ///
    /// If any segment cannot be counted, the whole measurement uses
    /// [`estimate_tokens`] instead so one call never mixes the two.
    pub async fn count(
        &self,
        system_instruction: &str,
        messages: &[ConversationMessage],
    ) -> usize {
        let segments: Vec<&str> = std::iter::once(system_instruction)
            .chain(messages.iter().map(|m| m.content.as_str()))
            .collect();

        let counted = stream::iter(segments.iter().copied())
            .map(|segment| self.count_segment(segment))
            .buffer_unordered(self.max_concurrent)
            .try_fold(0usize, |total, count| async move { Ok(total + count) })
            .await;

        match counted {
            Ok(total) => total,
            Err(e) => {
                tracing::warn!(
                    error = %ErrorChain(&e),
                    segments = segments.len(),
                    "token counting failed, using character estimate"
                );
                Self::estimate(&segments)
            }
        }
    }

    async fn count_segment(&self, segment: &str) -> Result<usize, GenerationError> {
        match tokio::time::timeout(self.timeout, self.generator.count_tokens(segment)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::TokenCount(format!(
                "timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn estimate(segments: &[&str]) -> usize {
        segments.iter().map(|s| estimate_tokens(s)).sum()
    }
}
