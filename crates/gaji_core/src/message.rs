//! Conversation messages as the context engine sees them

use std::fmt;

use serde::{Deserialize, Serialize};

/// Chat roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// A message exactly as the conversation store returns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
}

impl StoredMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One turn of a built context
///
/// `sequence_index` is the position in the stored history. Messages the
/// engine synthesizes (summaries, reminders) have none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_index: Option<usize>,
}

impl ConversationMessage {
    /// A stored message at its history position
    pub fn from_stored(message: StoredMessage, sequence_index: usize) -> Self {
        Self {
            role: message.role,
            content: message.content,
            sequence_index: Some(sequence_index),
        }
    }

    /// A system message created by the engine itself
    pub fn synthetic(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            sequence_index: None,
        }
    }

    pub fn user(content: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            sequence_index: Some(sequence_index),
        }
    }

    pub fn assistant(content: impl Into<String>, sequence_index: usize) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            sequence_index: Some(sequence_index),
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.sequence_index.is_none()
    }
}

/// Index a stored history in order
pub fn index_history(history: Vec<StoredMessage>) -> Vec<ConversationMessage> {
    history
        .into_iter()
        .enumerate()
        .map(|(idx, message)| ConversationMessage::from_stored(message, idx))
        .collect()
}

/// Render messages as a plain `role: content` transcript
pub fn transcript(messages: &[ConversationMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}
