//! Read-only access to scenarios and conversation history

use async_trait::async_trait;

use crate::message::StoredMessage;
use crate::scenario::ScenarioRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store answered and the record does not exist
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScenarioStore: Send + Sync + std::fmt::Debug {
    async fn get_scenario(&self, scenario_id: &str) -> Result<ScenarioRecord, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationStore: Send + Sync + std::fmt::Debug {
    /// Full history in chronological order
    async fn get_messages(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError>;
}
