use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Validation failed: {reason}")]
    #[diagnostic(
        code(gaji_core::validation_failed),
        help("Check the {field} value supplied for this request")
    )]
    Validation { field: String, reason: String },

    #[error("Scenario not found")]
    #[diagnostic(
        code(gaji_core::scenario_not_found),
        help("Check that scenario {scenario_id} exists in the scenario store")
    )]
    ScenarioNotFound { scenario_id: String },

    #[error("External service unavailable: {service}")]
    #[diagnostic(
        code(gaji_core::external_unavailable),
        help("The {service} collaborator could not be reached after {attempts} attempt(s)")
    )]
    ExternalUnavailable {
        service: String,
        attempts: usize,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("External service timed out: {service} after {after:?}")]
    #[diagnostic(
        code(gaji_core::external_timeout),
        help("Check that {service} is reachable and responsive")
    )]
    Timeout { service: String, after: Duration },

    #[error("Circuit breaker '{breaker}' is open, retry in {retry_after:?}")]
    #[diagnostic(
        code(gaji_core::circuit_open),
        help("Calls to {breaker} are short-circuited during a known outage")
    )]
    CircuitOpen {
        breaker: String,
        retry_after: Duration,
    },

    #[error("Token budget exceeded")]
    #[diagnostic(
        code(gaji_core::token_budget_exceeded),
        help(
            "Context measures {token_count} tokens across {message_count} messages but the limit is {max_tokens}"
        )
    )]
    TokenBudgetExceeded {
        token_count: usize,
        max_tokens: usize,
        message_count: usize,
    },

    #[error("Configuration error")]
    #[diagnostic(
        code(gaji_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },

    #[error("Serialization error")]
    #[diagnostic(
        code(gaji_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn scenario_not_found(scenario_id: impl Into<String>) -> Self {
        Self::ScenarioNotFound {
            scenario_id: scenario_id.into(),
        }
    }

    pub fn unavailable(
        service: impl Into<String>,
        attempts: usize,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ExternalUnavailable {
            service: service.into(),
            attempts,
            cause: Box::new(cause),
        }
    }

    pub fn timeout(service: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            service: service.into(),
            after,
        }
    }

    pub fn budget_exceeded(token_count: usize, max_tokens: usize, message_count: usize) -> Self {
        Self::TokenBudgetExceeded {
            token_count,
            max_tokens,
            message_count,
        }
    }

    /// Whether the failure is worth another attempt against the same collaborator.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalUnavailable { .. } | Self::Timeout { .. })
    }
}
