#![cfg(test)]

pub use fakes::*;
pub use fixtures::*;

pub mod fixtures {
    use serde_json::json;

    use crate::message::{MessageRole, StoredMessage};
    use crate::scenario::ScenarioRecord;
    use crate::vector::VectorMatch;

    /// Hermione sorted into Slytherin instead of Gryffindor
    pub fn character_change_record(id: &str) -> ScenarioRecord {
        ScenarioRecord {
            id: id.to_string(),
            base_story: "Harry Potter".to_string(),
            scenario_type: Some("CHARACTER_CHANGE".to_string()),
            parameters: serde_json::from_value(json!({
                "character": "Hermione",
                "original_property": "Gryffindor",
                "new_property": "Slytherin",
            }))
            .unwrap(),
        }
    }

    pub fn event_alteration_record(id: &str) -> ScenarioRecord {
        ScenarioRecord {
            id: id.to_string(),
            base_story: "Harry Potter".to_string(),
            scenario_type: Some("EVENT_ALTERATION".to_string()),
            parameters: serde_json::from_value(json!({
                "event_name": "Battle of Hogwarts",
                "original_outcome": "Voldemort defeated",
                "new_outcome": "Voldemort victorious",
            }))
            .unwrap(),
        }
    }

    /// Vector hit with six personality traits
    pub fn hermione_traits_match() -> VectorMatch {
        VectorMatch {
            id: "char-hermione".to_string(),
            document: "Brilliant, bookish witch and fiercely loyal friend.".to_string(),
            metadata: serde_json::from_value(json!({
                "name": "Hermione Granger",
                "role": "Student",
                "personality_traits": [
                    "intelligent", "loyal", "brave", "studious", "principled", "bossy"
                ],
            }))
            .unwrap(),
            distance: Some(0.08),
        }
    }

    /// Alternating user/assistant history of `n` messages
    pub fn conversation(n: usize) -> Vec<StoredMessage> {
        (0..n)
            .map(|i| {
                let role = if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                };
                StoredMessage::new(role, format!("message {}", i))
            })
            .collect()
    }
}

pub mod fakes {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::message::StoredMessage;
    use crate::model::{GenerationError, GenerationOptions, TextGenerator};
    use crate::scenario::ScenarioRecord;
    use crate::store::{ConversationStore, ScenarioStore, StoreError};
    use crate::vector::{VectorError, VectorMatch, VectorStore};

    /// Counts every segment as the same number of tokens and always
    /// summarizes successfully
    #[derive(Debug)]
    pub struct FixedTokenGenerator {
        tokens_per_segment: usize,
        generate_calls: AtomicUsize,
    }

    impl FixedTokenGenerator {
        pub fn new(tokens_per_segment: usize) -> Self {
            Self {
                tokens_per_segment,
                generate_calls: AtomicUsize::new(0),
            }
        }

        pub fn generate_calls(&self) -> usize {
            self.generate_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for FixedTokenGenerator {
        async fn count_tokens(&self, _content: &str) -> Result<usize, GenerationError> {
            Ok(self.tokens_per_segment)
        }

        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            Ok("Hermione was sorted into Slytherin and befriended Draco.".to_string())
        }
    }

    /// Returns one fixed hit, or fails every query, and records query text
    #[derive(Debug, Default)]
    pub struct FakeVectorStore {
        hit: Option<VectorMatch>,
        fail: bool,
        queries: Mutex<Vec<String>>,
    }

    impl FakeVectorStore {
        pub fn with_match(hit: VectorMatch) -> Self {
            Self {
                hit: Some(hit),
                ..Default::default()
            }
        }

        pub fn unavailable() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn queries(&self) -> Vec<String> {
            self.queries.lock().clone()
        }
    }

    #[async_trait]
    impl VectorStore for FakeVectorStore {
        async fn query(
            &self,
            _collection: &str,
            text: &str,
            top_k: usize,
        ) -> Result<Vec<VectorMatch>, VectorError> {
            self.queries.lock().push(text.to_string());
            if self.fail {
                return Err(VectorError::Unavailable("connection refused".to_string()));
            }
            Ok(self.hit.iter().take(top_k).cloned().collect())
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeScenarioStore {
        records: HashMap<String, ScenarioRecord>,
        calls: AtomicUsize,
    }

    impl FakeScenarioStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, record: ScenarioRecord) -> Self {
            self.records.insert(record.id.clone(), record);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScenarioStore for FakeScenarioStore {
        async fn get_scenario(&self, scenario_id: &str) -> Result<ScenarioRecord, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.records
                .get(scenario_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(scenario_id.to_string()))
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeConversationStore {
        conversations: HashMap<String, Vec<StoredMessage>>,
        calls: AtomicUsize,
    }

    impl FakeConversationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, conversation_id: &str, history: Vec<StoredMessage>) -> Self {
            self.conversations
                .insert(conversation_id.to_string(), history);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConversationStore for FakeConversationStore {
        async fn get_messages(
            &self,
            conversation_id: &str,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.conversations
                .get(conversation_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(conversation_id.to_string()))
        }
    }
}
