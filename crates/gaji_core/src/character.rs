//! Character trait lookup against the vector store
//!
//! Traits only enrich prompts, so a lookup never fails the request: an open
//! breaker, a timeout, a query error, no match or a malformed match all come
//! back as `None`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::GajiConfig;
use crate::resilience::{BreakerError, CircuitBreaker, CircuitBreakerSnapshot, with_timeout};
use crate::utils::ErrorChain;
use crate::vector::{VectorMatch, VectorStore};
use crate::{CoreError, Result};

const VECTOR_SERVICE: &str = "vectordb";

/// Personality data for one character
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterTraits {
    pub name: String,
    pub role: String,
    pub personality_traits: Vec<String>,
    pub description: String,
}

impl CharacterTraits {
    /// Build traits from a search hit. `None` when the metadata has the wrong
    /// shape.
    pub fn from_match(hit: &VectorMatch, character_name: &str) -> Option<Self> {
        let personality_traits = match hit.metadata.get("personality_traits") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::String(joined)) => joined
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Some(serde_json::Value::Array(items)) => {
                let mut traits = Vec::with_capacity(items.len());
                for item in items {
                    traits.push(item.as_str()?.trim().to_string());
                }
                traits
            }
            Some(_) => return None,
        };

        Some(Self {
            name: hit
                .metadata_str("name")
                .unwrap_or(character_name)
                .to_string(),
            role: hit.metadata_str("role").unwrap_or("Unknown").to_string(),
            personality_traits,
            description: hit.document.clone(),
        })
    }

    /// First `limit` personality traits
    pub fn top_traits(&self, limit: usize) -> &[String] {
        &self.personality_traits[..self.personality_traits.len().min(limit)]
    }
}

/// Looks up [`CharacterTraits`] behind its own circuit breaker
#[derive(Debug)]
pub struct TraitRetriever {
    vector_store: Arc<dyn VectorStore>,
    breaker: CircuitBreaker,
    collection: String,
    timeout: Duration,
}

impl TraitRetriever {
    pub fn new(vector_store: Arc<dyn VectorStore>, config: &GajiConfig) -> Self {
        Self {
            vector_store,
            breaker: CircuitBreaker::new(VECTOR_SERVICE, &config.resilience.circuit_breaker),
            collection: config.prompt.characters_collection.clone(),
            timeout: config.resilience.timeouts.trait_lookup(),
        }
    }

    /// Top match for `"{character} from {base_story}"`, if any
    pub async fn get_traits(
        &self,
        character_name: &str,
        base_story: &str,
    ) -> Option<CharacterTraits> {
        let query = format!("{} from {}", character_name, base_story);

        let hits = match self.breaker.call(|| self.query(&query)).await {
            Ok(hits) => hits,
            Err(BreakerError::Open { retry_after, .. }) => {
                tracing::debug!(
                    character = character_name,
                    ?retry_after,
                    "vector store breaker open, skipping trait lookup"
                );
                return None;
            }
            Err(BreakerError::Inner(e)) => {
                tracing::warn!(
                    character = character_name,
                    story = base_story,
                    error = %ErrorChain(&e),
                    "character trait lookup failed"
                );
                return None;
            }
        };

        let Some(hit) = hits.first() else {
            tracing::info!(
                character = character_name,
                story = base_story,
                "character not found in vector store"
            );
            return None;
        };

        match CharacterTraits::from_match(hit, character_name) {
            Some(traits) => {
                tracing::info!(
                    character = character_name,
                    story = base_story,
                    traits_count = traits.personality_traits.len(),
                    "character traits retrieved"
                );
                Some(traits)
            }
            None => {
                tracing::warn!(
                    character = character_name,
                    match_id = %hit.id,
                    "character match has malformed metadata"
                );
                None
            }
        }
    }

    async fn query(&self, query: &str) -> Result<Vec<VectorMatch>> {
        with_timeout(VECTOR_SERVICE, self.timeout, async {
            self.vector_store
                .query(&self.collection, query, 1)
                .await
                .map_err(|e| CoreError::unavailable(VECTOR_SERVICE, 1, e))
        })
        .await
    }

    pub fn circuit_breaker_state(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;
    use crate::vector::{MockVectorStore, VectorError};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn hermione_match(traits: serde_json::Value) -> VectorMatch {
        VectorMatch {
            id: "char-hermione".to_string(),
            document: "Brilliant, bookish witch and loyal friend.".to_string(),
            metadata: serde_json::from_value(json!({
                "name": "Hermione Granger",
                "role": "Student",
                "personality_traits": traits,
            }))
            .unwrap(),
            distance: Some(0.12),
        }
    }

    #[test]
    fn test_traits_from_array_and_comma_list() {
        let from_array = CharacterTraits::from_match(
            &hermione_match(json!(["intelligent", "loyal", "brave"])),
            "Hermione",
        )
        .unwrap();
        let from_string = CharacterTraits::from_match(
            &hermione_match(json!("intelligent, loyal,brave")),
            "Hermione",
        )
        .unwrap();

        assert_eq!(from_array, from_string);
        assert_eq!(from_array.name, "Hermione Granger");
        assert_eq!(from_array.role, "Student");
        assert_eq!(from_array.top_traits(2), ["intelligent", "loyal"]);
        assert_eq!(from_array.top_traits(10).len(), 3);
    }

    #[test]
    fn test_malformed_traits_rejected() {
        assert_eq!(
            CharacterTraits::from_match(&hermione_match(json!({"bad": true})), "Hermione"),
            None
        );
        assert_eq!(
            CharacterTraits::from_match(&hermione_match(json!(["ok", 3])), "Hermione"),
            None
        );
    }

    #[test]
    fn test_missing_metadata_uses_defaults() {
        let bare = VectorMatch {
            id: "x".to_string(),
            document: "Unknown wizard".to_string(),
            ..Default::default()
        };
        let traits = CharacterTraits::from_match(&bare, "Neville").unwrap();
        assert_eq!(traits.name, "Neville");
        assert_eq!(traits.role, "Unknown");
        assert!(traits.personality_traits.is_empty());
    }

    #[tokio::test]
    async fn test_queries_top_match_in_characters_collection() {
        let mut store = MockVectorStore::new();
        store
            .expect_query()
            .with(eq("characters"), eq("Hermione from Harry Potter"), eq(1))
            .times(1)
            .returning(|_, _, _| Ok(vec![hermione_match(json!(["intelligent"]))]));

        let retriever = TraitRetriever::new(Arc::new(store), &GajiConfig::default());
        let traits = retriever.get_traits("Hermione", "Harry Potter").await.unwrap();
        assert_eq!(traits.personality_traits, vec!["intelligent".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_result_is_absent_without_breaker_failure() {
        let mut store = MockVectorStore::new();
        store.expect_query().returning(|_, _, _| Ok(vec![]));

        let retriever = TraitRetriever::new(Arc::new(store), &GajiConfig::default());
        assert_eq!(retriever.get_traits("Nobody", "Harry Potter").await, None);
        assert_eq!(retriever.circuit_breaker_state().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn test_failures_open_breaker_and_skip_store() {
        let mut store = MockVectorStore::new();
        store
            .expect_query()
            .times(5)
            .returning(|_, _, _| Err(VectorError::Unavailable("connection refused".to_string())));

        let retriever = TraitRetriever::new(Arc::new(store), &GajiConfig::default());
        for _ in 0..5 {
            assert_eq!(retriever.get_traits("Hermione", "Harry Potter").await, None);
        }
        assert!(logs_contain("character trait lookup failed"));
        assert_eq!(retriever.circuit_breaker_state().state, CircuitState::Open);

        // sixth lookup never reaches the store
        assert_eq!(retriever.get_traits("Hermione", "Harry Potter").await, None);
    }

    #[derive(Debug)]
    struct SlowVectorStore;

    #[async_trait::async_trait]
    impl VectorStore for SlowVectorStore {
        async fn query(
            &self,
            _collection: &str,
            _text: &str,
            _top_k: usize,
        ) -> std::result::Result<Vec<VectorMatch>, VectorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_breaker_failure() {
        let retriever = TraitRetriever::new(Arc::new(SlowVectorStore), &GajiConfig::default());
        assert_eq!(retriever.get_traits("Hermione", "Harry Potter").await, None);
        assert_eq!(retriever.circuit_breaker_state().failure_count, 1);
    }
}
