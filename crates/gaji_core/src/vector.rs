//! Semantic search over stored documents

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("vector store unavailable: {0}")]
    Unavailable(String),
}

/// One search hit: the stored document plus its metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub document: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl VectorMatch {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync + std::fmt::Debug {
    /// Closest `top_k` documents in `collection` to `text`, best first
    async fn query(
        &self,
        collection: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>, VectorError>;
}
