//! Tracing subscriber setup for services embedding the core

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive used when `RUST_LOG` is not set: the configured level for
/// this crate, warnings for everything else.
pub fn default_directive(config: &LoggingConfig) -> String {
    format!("gaji_core={},warn", config.level)
}

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(config)))
}

/// Install the global subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// expected when the host application configures tracing itself.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = env_filter(config);

    let installed = match config.format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init(),
        LogFormat::Compact => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .compact()
            .try_init(),
    };

    installed.is_ok()
}
