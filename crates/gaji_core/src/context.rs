//! Context window assembly
//!
//! [`ContextWindowManager`] turns a scenario and a stored conversation into a
//! model-ready [`BuiltContext`]: the adapted system instruction plus a message
//! list that fits the token budget. Old history is summarized once it grows
//! past the optimization threshold, and character-change scenarios get
//! periodic consistency reminders.

pub mod compaction;
pub mod metrics;
pub mod reminders;
pub mod tokens;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use compaction::{Compactor, SUMMARY_FALLBACK, SUMMARY_PREFIX};
pub use metrics::{ContextMetrics, ContextMetricsSnapshot};
pub use reminders::ConsistencyInjector;
pub use tokens::TokenCounter;

use crate::cache::{CacheStore, JsonCache, context_key};
use crate::config::{ContextConfig, GajiConfig};
use crate::message::{ConversationMessage, StoredMessage, index_history};
use crate::model::TextGenerator;
use crate::prompt::PromptBuilder;
use crate::resilience::{CircuitBreakerSnapshot, with_timeout};
use crate::store::{ConversationStore, ScenarioStore, StoreError};
use crate::vector::VectorStore;
use crate::{CoreError, Result};

const CONVERSATION_SERVICE: &str = "conversation_store";

/// A model-ready context for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltContext {
    pub scenario_id: String,
    pub conversation_id: String,
    pub system_instruction: String,
    pub messages: Vec<ConversationMessage>,
    /// Measured cost of `system_instruction` plus every message
    pub token_count: usize,
    /// Whether history was summarized
    pub optimization_applied: bool,
    /// Whether this was served from the context cache
    pub cache_hit: bool,
}

/// External services the engine depends on
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub scenarios: Arc<dyn ScenarioStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub cache: Arc<dyn CacheStore>,
}

#[derive(Debug)]
pub struct ContextWindowManager {
    prompts: PromptBuilder,
    conversations: Arc<dyn ConversationStore>,
    counter: TokenCounter,
    compactor: Compactor,
    injector: ConsistencyInjector,
    cache: JsonCache,
    metrics: ContextMetrics,
    config: ContextConfig,
    conversation_timeout: Duration,
}

impl ContextWindowManager {
    pub fn new(collaborators: Collaborators, config: &GajiConfig) -> Self {
        let Collaborators {
            scenarios,
            conversations,
            vectors,
            generator,
            cache,
        } = collaborators;
        let timeouts = &config.resilience.timeouts;

        Self {
            prompts: PromptBuilder::new(scenarios, vectors, cache.clone(), config),
            conversations,
            counter: TokenCounter::new(
                generator.clone(),
                timeouts.token_count(),
                config.context.token_count_concurrency,
            ),
            compactor: Compactor::new(generator, config),
            injector: ConsistencyInjector::new(
                config.context.reminder_interval,
                config.prompt.max_preserved_traits,
            ),
            cache: JsonCache::new(cache, timeouts.cache()),
            metrics: ContextMetrics::new(),
            config: config.context.clone(),
            conversation_timeout: timeouts.conversation_load(),
        }
    }

    pub fn prompt_builder(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Build the context for the next turn of `conversation_id` under
    /// `scenario_id`.
    pub async fn build_context(
        &self,
        scenario_id: &str,
        conversation_id: &str,
    ) -> Result<BuiltContext> {
        if scenario_id.trim().is_empty() {
            return Err(CoreError::validation("scenario_id", "must not be empty"));
        }
        if conversation_id.trim().is_empty() {
            return Err(CoreError::validation("conversation_id", "must not be empty"));
        }

        let key = context_key(conversation_id);
        if let Some(mut cached) = self.cache.get::<BuiltContext>(&key).await {
            if cached.scenario_id == scenario_id {
                tracing::debug!(conversation_id, "context cache hit");
                cached.cache_hit = true;
                self.metrics.record_cache_hit(cached.token_count);
                return Ok(cached);
            }
            tracing::debug!(
                conversation_id,
                cached_scenario = %cached.scenario_id,
                "cached context belongs to another scenario, rebuilding"
            );
        }

        let adapted = self
            .prompts
            .adapt(scenario_id, &self.config.base_prompt)
            .await?;
        let system_instruction = adapted.system_instruction;

        let mut messages = index_history(self.load_history(conversation_id).await?);
        let mut token_count = self.counter.count(&system_instruction, &messages).await;
        let mut optimization_applied = false;

        if token_count > self.config.optimization_threshold
            && messages.len() > self.config.recent_message_count
        {
            let before = messages.len();
            messages = self
                .compactor
                .compact(messages, self.config.recent_message_count)
                .await;
            optimization_applied = true;

            let compacted_tokens = self.counter.count(&system_instruction, &messages).await;
            tracing::info!(
                conversation_id,
                messages_before = before,
                messages_after = messages.len(),
                tokens_before = token_count,
                tokens_after = compacted_tokens,
                "context compacted"
            );
            token_count = compacted_tokens;
        }

        let before_reminders = messages.len();
        messages = self.injector.inject_reminders(
            messages,
            &adapted.scenario,
            adapted.character_traits.as_ref(),
        );
        if messages.len() != before_reminders {
            token_count = self.counter.count(&system_instruction, &messages).await;
        }

        if token_count > self.config.max_input_tokens {
            self.metrics.record_budget_rejection();
            let err =
                CoreError::budget_exceeded(token_count, self.config.max_input_tokens, messages.len());
            crate::log_error!("context exceeds token budget", err);
            return Err(err);
        }

        let context = BuiltContext {
            scenario_id: scenario_id.to_string(),
            conversation_id: conversation_id.to_string(),
            system_instruction,
            messages,
            token_count,
            optimization_applied,
            cache_hit: false,
        };

        self.cache.set(&key, &context, self.config.cache_ttl()).await;
        self.metrics
            .record_built(context.token_count, optimization_applied);

        tracing::info!(
            scenario_id,
            conversation_id,
            message_count = context.messages.len(),
            token_count = context.token_count,
            optimization_applied,
            "context built"
        );
        Ok(context)
    }

    async fn load_history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>> {
        with_timeout(CONVERSATION_SERVICE, self.conversation_timeout, async {
            match self.conversations.get_messages(conversation_id).await {
                Ok(history) => Ok(history),
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(conversation_id, "no stored history, starting empty");
                    Ok(Vec::new())
                }
                Err(StoreError::Malformed(reason)) => {
                    Err(CoreError::validation("conversation", reason))
                }
                Err(e) => Err(CoreError::unavailable(CONVERSATION_SERVICE, 1, e)),
            }
        })
        .await
    }

    pub fn metrics(&self) -> ContextMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Snapshots of every breaker the engine owns
    pub fn circuit_breakers(&self) -> Vec<CircuitBreakerSnapshot> {
        vec![
            self.prompts.circuit_breaker_state(),
            self.compactor.circuit_breaker_state(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::message::MessageRole;
    use crate::test_helpers::{
        FakeConversationStore, FakeScenarioStore, FakeVectorStore, FixedTokenGenerator,
        character_change_record, conversation, event_alteration_record, hermione_traits_match,
    };
    use pretty_assertions::assert_eq;

    struct Harness {
        manager: ContextWindowManager,
        scenarios: Arc<FakeScenarioStore>,
        conversations: Arc<FakeConversationStore>,
        generator: Arc<FixedTokenGenerator>,
    }

    fn harness(tokens_per_segment: usize, history: usize, config: GajiConfig) -> Harness {
        let scenarios = Arc::new(
            FakeScenarioStore::new()
                .with(character_change_record("hermione"))
                .with(event_alteration_record("battle")),
        );
        let conversations =
            Arc::new(FakeConversationStore::new().with("conv-1", conversation(history)));
        let generator = Arc::new(FixedTokenGenerator::new(tokens_per_segment));

        let manager = ContextWindowManager::new(
            Collaborators {
                scenarios: scenarios.clone(),
                conversations: conversations.clone(),
                vectors: Arc::new(FakeVectorStore::with_match(hermione_traits_match())),
                generator: generator.clone(),
                cache: Arc::new(MemoryCache::new()),
            },
            &config,
        );

        Harness {
            manager,
            scenarios,
            conversations,
            generator,
        }
    }

    #[tokio::test]
    async fn test_small_conversation_passes_through() {
        let h = harness(10, 4, GajiConfig::default());
        let context = h.manager.build_context("battle", "conv-1").await.unwrap();

        assert_eq!(context.messages.len(), 4);
        assert_eq!(context.token_count, 50);
        assert!(!context.optimization_applied);
        assert!(!context.cache_hit);
        assert!(context.system_instruction.contains("Battle of Hogwarts"));
        assert_eq!(
            context
                .messages
                .iter()
                .map(|m| m.sequence_index)
                .collect::<Vec<_>>(),
            vec![Some(0), Some(1), Some(2), Some(3)]
        );
    }

    #[tokio::test]
    async fn test_long_conversation_is_compacted() {
        let h = harness(150, 150, GajiConfig::default());
        let context = h.manager.build_context("battle", "conv-1").await.unwrap();

        assert!(context.optimization_applied);
        assert_eq!(context.messages.len(), 101);
        assert_eq!(context.messages[0].role, MessageRole::System);
        assert!(context.messages[0].content.starts_with(SUMMARY_PREFIX));
        assert_eq!(context.messages[1].sequence_index, Some(50));
        assert_eq!(context.messages[100].sequence_index, Some(149));
        assert_eq!(context.token_count, 102 * 150);
        assert_eq!(h.generator.generate_calls(), 1);
    }

    #[tokio::test]
    async fn test_many_cheap_messages_are_not_compacted() {
        // over the message count but under the token threshold
        let h = harness(1, 150, GajiConfig::default());
        let context = h.manager.build_context("battle", "conv-1").await.unwrap();
        assert!(!context.optimization_applied);
        assert_eq!(context.messages.len(), 150);
    }

    #[tokio::test]
    async fn test_character_change_gets_reminders() {
        let h = harness(1, 120, GajiConfig::default());
        let context = h.manager.build_context("hermione", "conv-1").await.unwrap();

        let reminders: Vec<_> = context
            .messages
            .iter()
            .filter(|m| m.is_synthetic())
            .collect();
        assert_eq!(reminders.len(), 2);
        assert!(reminders[0].content.contains("Hermione is Slytherin, NOT Gryffindor"));
        assert!(reminders[0].content.contains("intelligent"));
        assert_eq!(context.token_count, 123);
    }

    #[tokio::test]
    async fn test_budget_boundary() {
        let mut config = GajiConfig::default();
        config.context.max_input_tokens = 100;
        let h = harness(10, 9, config.clone());
        let context = h.manager.build_context("battle", "conv-1").await.unwrap();
        assert_eq!(context.token_count, 100);

        config.context.max_input_tokens = 99;
        let h = harness(10, 9, config);
        let err = h.manager.build_context("battle", "conv-1").await.unwrap_err();
        match err {
            CoreError::TokenBudgetExceeded {
                token_count,
                max_tokens,
                message_count,
            } => {
                assert_eq!(token_count, 100);
                assert_eq!(max_tokens, 99);
                assert_eq!(message_count, 9);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(h.manager.metrics().budget_rejections, 1);
    }

    #[tokio::test]
    async fn test_second_build_served_from_cache() {
        let h = harness(10, 4, GajiConfig::default());
        let first = h.manager.build_context("battle", "conv-1").await.unwrap();
        let second = h.manager.build_context("battle", "conv-1").await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.messages, first.messages);
        assert_eq!(h.conversations.calls(), 1);
        assert_eq!(h.scenarios.calls(), 1);

        let metrics = h.manager.metrics();
        assert_eq!(metrics.total_contexts_built, 2);
        assert_eq!(metrics.cache_hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_cached_context_for_other_scenario_is_rebuilt() {
        let h = harness(10, 4, GajiConfig::default());
        h.manager.build_context("battle", "conv-1").await.unwrap();
        let other = h.manager.build_context("hermione", "conv-1").await.unwrap();

        assert!(!other.cache_hit);
        assert!(other.system_instruction.contains("Hermione"));
        assert_eq!(h.conversations.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_conversation_starts_empty() {
        let h = harness(10, 0, GajiConfig::default());
        let context = h.manager.build_context("battle", "conv-new").await.unwrap();
        assert!(context.messages.is_empty());
        assert_eq!(context.token_count, 10);
    }

    #[tokio::test]
    async fn test_validation_and_missing_scenario() {
        let h = harness(10, 4, GajiConfig::default());
        assert!(matches!(
            h.manager.build_context("", "conv-1").await,
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            h.manager.build_context("battle", " ").await,
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            h.manager.build_context("ghost", "conv-1").await,
            Err(CoreError::ScenarioNotFound { .. })
        ));
    }

    #[test]
    fn test_built_context_wire_format() {
        let context = BuiltContext {
            scenario_id: "s".to_string(),
            conversation_id: "c".to_string(),
            system_instruction: "sys".to_string(),
            messages: vec![ConversationMessage::synthetic("[note]")],
            token_count: 3,
            optimization_applied: false,
            cache_hit: false,
        };
        let json = serde_json::to_value(&context).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json["messages"][0].get("sequence_index").is_none());
    }
}
