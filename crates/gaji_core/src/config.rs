//! Configuration system for Gaji
//!
//! Every section defaults to the production values, so a config file only
//! needs to name the settings it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, Result, error::ConfigError};

/// Base instruction used when a caller does not supply one
pub const DEFAULT_BASE_PROMPT: &str =
    "You are a character from a novel, engaging in a 'what if' scenario conversation.";

/// Top-level configuration for Gaji
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GajiConfig {
    /// Context window assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// System instruction building
    #[serde(default)]
    pub prompt: PromptConfig,

    /// Circuit breakers, retries and timeouts
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Text generation parameters
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Token budget and compaction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard cap on the measured input tokens of a built context
    pub max_input_tokens: usize,

    /// Compaction is considered above this many tokens
    pub optimization_threshold: usize,

    /// Messages kept verbatim when compacting
    pub recent_message_count: usize,

    /// A consistency reminder follows every this many messages
    pub reminder_interval: usize,

    /// How long a built context stays cached
    pub cache_ttl_secs: u64,

    /// Token count requests allowed in flight at once
    pub token_count_concurrency: usize,

    /// Base instruction handed to the prompt builder
    pub base_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_input_tokens: 1_000_000,
            optimization_threshold: 10_000,
            recent_message_count: 100,
            reminder_interval: 50,
            cache_ttl_secs: 300,
            token_count_concurrency: 8,
            base_prompt: DEFAULT_BASE_PROMPT.to_string(),
        }
    }
}

impl ContextConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub cache_ttl_secs: u64,

    /// TTL for a character-change prompt built without traits, so it is
    /// rebuilt soon after the vector store recovers
    pub degraded_cache_ttl_secs: u64,

    /// Vector collection holding character profiles
    pub characters_collection: String,

    /// Maximum personality traits named in a preserved-traits block
    pub max_preserved_traits: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            degraded_cache_ttl_secs: 60,
            characters_collection: "characters".to_string(),
            max_preserved_traits: 5,
        }
    }
}

impl PromptConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn degraded_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.degraded_cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,

    /// Cooldown after the last failure before a trial call is allowed
    pub reset_timeout_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// Exponential backoff for the scenario fetch path
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub initial_delay_ms: u64,
    pub factor: f32,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Per-collaborator call timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub scenario_fetch_secs: u64,
    pub trait_lookup_secs: u64,
    pub generation_secs: u64,
    pub token_count_secs: u64,
    pub conversation_load_secs: u64,
    pub cache_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scenario_fetch_secs: 30,
            trait_lookup_secs: 5,
            generation_secs: 30,
            token_count_secs: 10,
            conversation_load_secs: 30,
            cache_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn scenario_fetch(&self) -> Duration {
        Duration::from_secs(self.scenario_fetch_secs)
    }

    pub fn trait_lookup(&self) -> Duration {
        Duration::from_secs(self.trait_lookup_secs)
    }

    pub fn generation(&self) -> Duration {
        Duration::from_secs(self.generation_secs)
    }

    pub fn token_count(&self) -> Duration {
        Duration::from_secs(self.token_count_secs)
    }

    pub fn conversation_load(&self) -> Duration {
        Duration::from_secs(self.conversation_load_secs)
    }

    pub fn cache(&self) -> Duration {
        Duration::from_secs(self.cache_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Model identifier passed to the generation client
    pub model: String,
    pub summary_temperature: f64,
    pub summary_max_tokens: u32,
    pub summary_target_words: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash".to_string(),
            summary_temperature: 0.2,
            summary_max_tokens: 500,
            summary_target_words: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Json,
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<GajiConfig> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "readable TOML file".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;

    toml::from_str(&content).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "content".to_string(),
        expected: "valid TOML configuration".to_string(),
        cause: ConfigError::TomlParse(e.to_string()),
    })
}

/// Save configuration to a TOML file, creating parent directories
pub async fn save_config(config: &GajiConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "serializable configuration".to_string(),
            cause: ConfigError::TomlSerialize(e.to_string()),
        })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Project-specific config
    paths.push(PathBuf::from("gaji.toml"));

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("gaji").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".gaji").join("config.toml"));
    }

    paths
}

/// Load configuration from standard locations
pub async fn load_config_from_standard_locations() -> Result<GajiConfig> {
    for path in config_paths() {
        if path.exists() {
            tracing::info!(path = %path.display(), "loading configuration");
            return load_config(&path).await;
        }
    }

    // No config found, return default
    Ok(GajiConfig::default())
}

impl GajiConfig {
    pub async fn load() -> Result<Self> {
        load_config_from_standard_locations().await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        load_config(path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        save_config(self, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_production_limits() {
        let config = GajiConfig::default();
        assert_eq!(config.context.max_input_tokens, 1_000_000);
        assert_eq!(config.context.optimization_threshold, 10_000);
        assert_eq!(config.context.recent_message_count, 100);
        assert_eq!(config.context.reminder_interval, 50);
        assert_eq!(config.context.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.prompt.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            config.resilience.circuit_breaker.reset_timeout(),
            Duration::from_secs(60)
        );
        assert_eq!(config.resilience.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [context]
            max_input_tokens = 32000

            [resilience.circuit_breaker]
            failure_threshold = 2

            [logging]
            format = "json"
        "#;

        let config: GajiConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.context.max_input_tokens, 32_000);
        assert_eq!(config.context.recent_message_count, 100);
        assert_eq!(config.resilience.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.resilience.circuit_breaker.reset_timeout_secs, 60);
        assert_eq!(config.resilience.timeouts.trait_lookup_secs, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.generation.summary_max_tokens, 500);
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("gaji.toml");

        let mut config = GajiConfig::default();
        config.generation.model = "gemini-2.0-flash".to_string();
        config.context.reminder_interval = 25;

        config.save_to(&path).await.unwrap();
        let loaded = GajiConfig::load_from(&path).await.unwrap();

        assert_eq!(loaded.generation.model, "gemini-2.0-flash");
        assert_eq!(loaded.context.reminder_interval, 25);
    }

    #[tokio::test]
    async fn test_invalid_toml_reports_configuration_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        tokio::fs::write(&path, "[context\nmax_input_tokens = ")
            .await
            .unwrap();

        let err = load_config(&path).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::ConfigurationError {
                cause: ConfigError::TomlParse(_),
                ..
            }
        ));
    }
}
