//! Gaji Core - Scenario Context Engine
//!
//! Builds model-ready contexts for "what-if" story conversations: a system
//! instruction adapted to the scenario, plus conversation history kept inside
//! the token budget through summarization and periodic character reminders.
//! Scenario, conversation, vector and generation services are consumed
//! through the traits in [`store`], [`vector`] and [`model`].

pub mod cache;
pub mod character;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod model;
pub mod prompt;
pub mod resilience;
pub mod scenario;
pub mod store;
pub mod telemetry;
pub mod utils;
pub mod vector;

mod test_helpers;

// Macros are automatically available at crate root due to #[macro_export]

pub use cache::{CacheStore, MemoryCache};
pub use character::{CharacterTraits, TraitRetriever};
pub use config::GajiConfig;
pub use context::{BuiltContext, Collaborators, ContextMetricsSnapshot, ContextWindowManager};
pub use error::{CoreError, Result};
pub use message::{ConversationMessage, MessageRole, StoredMessage};
pub use model::{GenAiGenerator, TextGenerator};
pub use prompt::{AdaptedPrompt, PromptBuilder};
pub use resilience::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState, RetryPolicy};
pub use scenario::{Scenario, ScenarioKind, ScenarioRecord};
pub use store::{ConversationStore, ScenarioStore};
pub use vector::{VectorMatch, VectorStore};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        AdaptedPrompt, BuiltContext, CacheStore, CharacterTraits, Collaborators,
        ContextWindowManager, ConversationMessage, ConversationStore, CoreError, GajiConfig,
        GenAiGenerator, MemoryCache, MessageRole, PromptBuilder, Result, Scenario, ScenarioKind,
        ScenarioRecord, ScenarioStore, StoredMessage, TextGenerator, VectorMatch, VectorStore,
    };
}
